//! Modes, mode policies and the per-request strategy context.

use serde::{Deserialize, Serialize};

use crate::queue::JobKind;

/// Operating mode of a dispatch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Chat,
    SimpleQa,
    DeepWrite,
    Analysis,
    SystemCmd,
    KbSearch,
    AnalyzePersona,
    Writer,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::SimpleQa => "simple_qa",
            Self::DeepWrite => "deep_write",
            Self::Analysis => "analysis",
            Self::SystemCmd => "system_cmd",
            Self::KbSearch => "kb_search",
            Self::AnalyzePersona => "analyze_persona",
            Self::Writer => "writer",
        }
    }

    /// Modes that bypass the queue and run inline on the dispatch call.
    pub fn is_fast_path(&self) -> bool {
        matches!(self, Self::KbSearch | Self::SystemCmd)
    }

    /// The job kind a queued mode maps to. Fast-path modes have none.
    pub fn job_kind(&self) -> Option<JobKind> {
        match self {
            Self::Chat => Some(JobKind::Chat),
            Self::SimpleQa => Some(JobKind::SimpleQa),
            Self::DeepWrite => Some(JobKind::DeepWrite),
            Self::Analysis => Some(JobKind::Analysis),
            Self::AnalyzePersona => Some(JobKind::AnalyzePersona),
            Self::Writer => Some(JobKind::Writer),
            Self::KbSearch | Self::SystemCmd => None,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "simple_qa" => Ok(Self::SimpleQa),
            "deep_write" => Ok(Self::DeepWrite),
            "analysis" => Ok(Self::Analysis),
            "system_cmd" => Ok(Self::SystemCmd),
            "kb_search" => Ok(Self::KbSearch),
            "analyze_persona" => Ok(Self::AnalyzePersona),
            "writer" => Ok(Self::Writer),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Per-mode defaults, applied over the globals and under caller
/// overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModePolicy {
    pub temperature: Option<f32>,
    pub web_enabled: Option<bool>,
}

impl ModePolicy {
    /// The mode-policy table.
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            // Fast, accuracy-first answering.
            Mode::SimpleQa => Self {
                temperature: Some(0.3),
                web_enabled: None,
            },
            // Long-form research output wants the web.
            Mode::DeepWrite => Self {
                temperature: Some(0.6),
                web_enabled: Some(true),
            },
            Mode::Writer => Self {
                temperature: Some(0.7),
                web_enabled: Some(true),
            },
            // Local command handling never touches the network.
            Mode::SystemCmd => Self {
                temperature: None,
                web_enabled: Some(false),
            },
            Mode::KbSearch => Self {
                temperature: Some(0.3),
                web_enabled: Some(false),
            },
            Mode::Analysis => Self {
                temperature: Some(0.4),
                web_enabled: Some(false),
            },
            Mode::AnalyzePersona => Self {
                temperature: Some(0.5),
                web_enabled: Some(false),
            },
            Mode::Chat => Self::default(),
        }
    }
}

/// Process-wide strategy defaults.
#[derive(Debug, Clone)]
pub struct GlobalStrategy {
    pub temperature: f32,
    pub web_enabled: bool,
    pub audience: String,
    pub tone: String,
    pub genre: String,
    pub goal: String,
}

impl Default for GlobalStrategy {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            web_enabled: false,
            audience: "general readers".to_string(),
            tone: "neutral".to_string(),
            genre: "general".to_string(),
            goal: "provide useful information".to_string(),
        }
    }
}

/// Caller-supplied overrides; every field is optional and wins over both
/// the mode policy and the globals.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigOverrides {
    pub temperature: Option<f32>,
    pub web_enabled: Option<bool>,
    pub audience: Option<String>,
    pub tone: Option<String>,
    pub genre: Option<String>,
    pub goal: Option<String>,
    pub system_prompt: Option<String>,
}

/// Ephemeral per-request configuration. Never persisted; rebuilt on
/// every dispatch.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub mode: Mode,
    pub temperature: f32,
    pub web_enabled: bool,
    pub audience: String,
    pub tone: String,
    pub genre: String,
    pub goal: String,
    pub system_prompt: Option<String>,
}

impl StrategyContext {
    /// Merge globals ⊕ mode policy ⊕ caller overrides (later wins).
    pub fn build(mode: Mode, globals: &GlobalStrategy, overrides: &ConfigOverrides) -> Self {
        let policy = ModePolicy::for_mode(mode);
        Self {
            mode,
            temperature: overrides
                .temperature
                .or(policy.temperature)
                .unwrap_or(globals.temperature),
            web_enabled: overrides
                .web_enabled
                .or(policy.web_enabled)
                .unwrap_or(globals.web_enabled),
            audience: overrides
                .audience
                .clone()
                .unwrap_or_else(|| globals.audience.clone()),
            tone: overrides
                .tone
                .clone()
                .unwrap_or_else(|| globals.tone.clone()),
            genre: overrides
                .genre
                .clone()
                .unwrap_or_else(|| globals.genre.clone()),
            goal: overrides
                .goal
                .clone()
                .unwrap_or_else(|| globals.goal.clone()),
            system_prompt: overrides.system_prompt.clone(),
        }
    }
}
