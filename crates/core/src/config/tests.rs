use std::io::Write;

use super::types::{OffloadMode, PolicyMode, ReportFormat, SchedulerConfig, DEFAULT_SLICE_NS};

#[test]
fn empty_toml_uses_defaults() {
    let cfg = SchedulerConfig::from_toml("").unwrap();
    assert_eq!(cfg.policy.mode, PolicyMode::Fair);
    assert_eq!(cfg.policy.offload, OffloadMode::Heartbeat);
    assert_eq!(cfg.policy.slice_ns, DEFAULT_SLICE_NS);
    assert_eq!(cfg.policy.vtime_scale, 100);
    assert_eq!(cfg.policy.drain_batch, 256);
    assert_eq!(cfg.policy.heartbeat_payload, 10);
    assert_eq!(cfg.channel.capacity, 1024);
    assert_eq!(cfg.coordinator.poll_wait_ms, 100);
    assert_eq!(cfg.coordinator.format, ReportFormat::Csv);
}

#[test]
fn parse_full_toml() {
    let toml = r#"
[policy]
mode = "fifo"
slice_ns = 5000000
offload = "per_enqueue"
drain_batch = 32
offload_timeout_ms = 250
max_tracked = 64
registry_shards = 4

[channel]
capacity = 16

[coordinator]
poll_wait_ms = 10
report_interval_ms = 500
format = "json"
"#;
    let cfg = SchedulerConfig::from_toml(toml).unwrap();
    assert_eq!(cfg.policy.mode, PolicyMode::Fifo);
    assert_eq!(cfg.policy.offload, OffloadMode::PerEnqueue);
    assert_eq!(cfg.policy.slice_ns, 5_000_000);
    assert_eq!(cfg.policy.drain_batch, 32);
    assert_eq!(cfg.policy.run_drain_batch, 16); // default
    assert_eq!(cfg.policy.offload_timeout_ns(), 250_000_000);
    assert_eq!(cfg.policy.registry_shards, 4);
    assert_eq!(cfg.channel.capacity, 16);
    assert_eq!(cfg.coordinator.report_interval_ms, 500);
    assert_eq!(cfg.coordinator.format, ReportFormat::Json);
}

#[test]
fn rejects_zero_capacity() {
    let err = SchedulerConfig::from_toml("[channel]\ncapacity = 0\n").unwrap_err();
    assert!(err.to_string().contains("channel.capacity"), "got: {err}");
}

#[test]
fn rejects_oversized_capacity() {
    let err = SchedulerConfig::from_toml("[channel]\ncapacity = 100000\n").unwrap_err();
    assert!(err.to_string().contains("100000"), "got: {err}");
}

#[test]
fn rejects_non_power_of_two_shards() {
    let err = SchedulerConfig::from_toml("[policy]\nregistry_shards = 3\n").unwrap_err();
    assert!(err.to_string().contains("registry_shards"), "got: {err}");
}

#[test]
fn rejects_unknown_mode() {
    assert!(SchedulerConfig::from_toml("[policy]\nmode = \"lottery\"\n").is_err());
}

#[test]
fn mode_from_str_accepts_aliases() {
    assert_eq!("FIFO".parse::<PolicyMode>().unwrap(), PolicyMode::Fifo);
    assert_eq!("vtime".parse::<PolicyMode>().unwrap(), PolicyMode::Fair);
    assert_eq!("per-enqueue".parse::<OffloadMode>().unwrap(), OffloadMode::PerEnqueue);
    assert_eq!("none".parse::<OffloadMode>().unwrap(), OffloadMode::Off);
    assert!("sometimes".parse::<OffloadMode>().is_err());
}

fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
    move |key| {
        pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| (*v).to_string())
    }
}

#[test]
fn override_channel_capacity() {
    let mut cfg = SchedulerConfig::default();
    cfg.apply_overrides_from(lookup(&[("OFFSCHED_CHANNEL_CAPACITY", "64")]));
    assert_eq!(cfg.channel.capacity, 64);
}

#[test]
fn override_policy_mode_and_offload() {
    let mut cfg = SchedulerConfig::default();
    cfg.apply_overrides_from(lookup(&[
        ("OFFSCHED_POLICY_MODE", "fifo"),
        ("OFFSCHED_POLICY_OFFLOAD", "inline"),
        ("OFFSCHED_COORDINATOR_POLL_WAIT_MS", "5"),
    ]));
    assert_eq!(cfg.policy.mode, PolicyMode::Fifo);
    assert_eq!(cfg.policy.offload, OffloadMode::Inline);
    assert_eq!(cfg.coordinator.poll_wait_ms, 5);
}

#[test]
fn invalid_override_is_ignored() {
    let mut cfg = SchedulerConfig::default();
    cfg.policy.offload = OffloadMode::Inline;
    cfg.apply_overrides_from(lookup(&[
        ("OFFSCHED_POLICY_OFFLOAD", "sometimes"),
        ("OFFSCHED_CHANNEL_CAPACITY", ""),
    ]));
    assert_eq!(cfg.policy.offload, OffloadMode::Inline);
    assert_eq!(cfg.channel.capacity, 1024);
}

#[test]
fn load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[policy]\nmode = \"fair\"\nvtime_scale = 50").unwrap();
    let cfg = SchedulerConfig::from_file(file.path()).unwrap();
    assert_eq!(cfg.policy.vtime_scale, 50);
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SchedulerConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("I/O"), "got: {err}");
}
