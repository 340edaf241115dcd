use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which of src-IP / dst-IP / src-port / dst-port increment per flow.
///
/// Mirrors the seven modes in §6's profile filename grammar. `s` increments
/// source IP only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FlowMode {
    S,
    Sd,
    Sp,
    Dp,
    Spd,
    Sdpp,
    Sdpd,
}

impl FlowMode {
    pub const ALL: [FlowMode; 7] = [
        FlowMode::S,
        FlowMode::Sd,
        FlowMode::Sp,
        FlowMode::Dp,
        FlowMode::Spd,
        FlowMode::Sdpp,
        FlowMode::Sdpd,
    ];

    fn as_token(&self) -> &'static str {
        match self {
            FlowMode::S => "s",
            FlowMode::Sd => "sd",
            FlowMode::Sp => "sp",
            FlowMode::Dp => "dp",
            FlowMode::Spd => "spd",
            FlowMode::Sdpp => "sdpp",
            FlowMode::Sdpd => "sdpd",
        }
    }

    /// Whether flow N's source IP is bumped relative to flow N-1.
    pub fn increments_src_ip(&self) -> bool {
        matches!(self, FlowMode::S | FlowMode::Sd | FlowMode::Sp | FlowMode::Spd | FlowMode::Sdpd)
    }

    pub fn increments_dst_ip(&self) -> bool {
        matches!(self, FlowMode::Sd | FlowMode::Dp | FlowMode::Spd | FlowMode::Sdpd)
    }

    pub fn increments_src_port(&self) -> bool {
        matches!(self, FlowMode::Sp | FlowMode::Sdpp | FlowMode::Sdpd)
    }

    pub fn increments_dst_port(&self) -> bool {
        matches!(self, FlowMode::Dp | FlowMode::Sdpp | FlowMode::Sdpd)
    }
}

impl fmt::Display for FlowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

impl FromStr for FlowMode {
    type Err = ProfileParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FlowMode::ALL
            .into_iter()
            .find(|m| m.as_token() == s)
            .ok_or_else(|| ProfileParseError::BadMode(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileParseError {
    #[error("filename {0:?} does not match the profile grammar")]
    BadGrammar(String),
    #[error("unrecognized flow mode {0:?}")]
    BadMode(String),
    #[error("bad integer field in filename {0:?}")]
    BadInt(String),
}

/// An opaque generator-script artifact, identified by filename, plus its
/// extracted parameters. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    path: PathBuf,
    pkt_size: u32,
    num_flows: u32,
    percent_rate: u8,
    flow_mode: FlowMode,
}

impl Profile {
    /// Parses `profile_<flows>_flows_pkt_size_<size>B_<rate>_rate_<mode>.lua`.
    pub fn parse(path: impl AsRef<Path>) -> Result<Self, ProfileParseError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ProfileParseError::BadGrammar(path.display().to_string()))?;

        let stem = name
            .strip_suffix(".lua")
            .ok_or_else(|| ProfileParseError::BadGrammar(name.to_string()))?;
        let rest = stem
            .strip_prefix("profile_")
            .ok_or_else(|| ProfileParseError::BadGrammar(name.to_string()))?;
        let (flows_part, rest) = rest
            .split_once("_flows_pkt_size_")
            .ok_or_else(|| ProfileParseError::BadGrammar(name.to_string()))?;
        let (size_part, rest) = rest
            .split_once("B_")
            .ok_or_else(|| ProfileParseError::BadGrammar(name.to_string()))?;
        let (rate_part, mode_part) = rest
            .split_once("_rate_")
            .ok_or_else(|| ProfileParseError::BadGrammar(name.to_string()))?;

        let num_flows: u32 = flows_part
            .parse()
            .map_err(|_| ProfileParseError::BadInt(flows_part.to_string()))?;
        let pkt_size: u32 = size_part
            .parse()
            .map_err(|_| ProfileParseError::BadInt(size_part.to_string()))?;
        let percent_rate: u8 = rate_part
            .parse()
            .map_err(|_| ProfileParseError::BadInt(rate_part.to_string()))?;
        let flow_mode: FlowMode = mode_part.parse()?;

        Ok(Profile {
            path: path.to_path_buf(),
            pkt_size,
            num_flows,
            percent_rate,
            flow_mode,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
    }

    /// Filename with the `.lua` extension stripped, used in artifact names.
    pub fn basename(&self) -> String {
        self.filename().trim_end_matches(".lua").to_string()
    }

    pub fn pkt_size(&self) -> u32 {
        self.pkt_size
    }

    pub fn num_flows(&self) -> u32 {
        self.num_flows
    }

    pub fn percent_rate(&self) -> u8 {
        self.percent_rate
    }

    pub fn flow_mode(&self) -> FlowMode {
        self.flow_mode
    }

    /// Renders the canonical filename for a given parameter set, the inverse of `parse`.
    pub fn filename_for(num_flows: u32, pkt_size: u32, percent_rate: u8, flow_mode: FlowMode) -> String {
        format!("profile_{num_flows}_flows_pkt_size_{pkt_size}B_{percent_rate}_rate_{flow_mode}.lua")
    }
}
