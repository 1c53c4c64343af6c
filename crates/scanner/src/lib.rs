pub mod classifier;
pub mod paths;
pub mod ports;
pub mod signatures;

pub use classifier::{classify, Baseline, ProbeObservation, MAX_SNIPPET_BYTES};
pub use paths::{paths_for_profile, random_missing_path, ProbePath};
pub use ports::{banner_snippet, ports_for_profile, probe_port, PortProbeOutcome};
pub use signatures::match_banner;
