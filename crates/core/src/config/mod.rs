mod loading;
mod types;
mod validation;

#[cfg(test)]
mod tests;

pub use loading::load_dotenv;
pub use types::{
    ChannelConfig, CoordinatorConfig, OffloadMode, PolicyConfig, PolicyMode, ReportFormat,
    SchedulerConfig, DEFAULT_SLICE_NS,
};
