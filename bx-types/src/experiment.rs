use md5::{Digest, Md5};
use std::fmt;

/// The 8-hex-character identifier for one invocation: `hex8(md5(profile_name \vee timestamp))`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ExperimentId(String);

impl ExperimentId {
    /// `timestamp` is seconds since the epoch, passed in rather than read from the
    /// clock so callers control it (and tests can make it deterministic).
    pub fn derive(profile_name: &str, timestamp: i64) -> Self {
        let mut hasher = Md5::new();
        hasher.update(profile_name.as_bytes());
        hasher.update(timestamp.to_string().as_bytes());
        let digest = hasher.finalize();
        let full = hex::encode(digest);
        ExperimentId(full[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExperimentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
