//! Multi-step conversational flows.
//!
//! A flow is a fixed ordered list of fields; each free-text reply fills the
//! current field and advances the step. [`pending::PendingActionStore`] holds
//! the single in-flight flow per user, and [`engine::Engine`] drives the
//! whole conversation.

pub mod engine;
pub mod menus;
pub mod pending;

pub use engine::Engine;
pub use pending::PendingActionStore;

/// Reply that skips an optional field.
pub const SKIP_SENTINEL: &str = "-";

/// The flow kinds the bot supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    CreateService,
    SetRepository,
    AddEnvVars,
    DeleteEnvVar,
}

/// One step of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name the collected value is stored under.
    pub name: &'static str,
    /// Instruction shown when the step is reached (and repeated on invalid
    /// input).
    pub prompt: &'static str,
    /// Optional fields accept the skip sentinel and store an empty value.
    pub optional: bool,
}

impl FlowKind {
    /// The ordered field sequence of this flow.
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            FlowKind::CreateService => &[
                FieldSpec {
                    name: "type",
                    prompt: "Send the service type (one of: static_site, web_service, \
                             private_service, background_worker, cron_job, workflow):",
                    optional: false,
                },
                FieldSpec {
                    name: "name",
                    prompt: "Send a name for the new service:",
                    optional: false,
                },
                FieldSpec {
                    name: "repository",
                    prompt: "Send the repository URL (e.g. https://github.com/USER/REPO):",
                    optional: false,
                },
                FieldSpec {
                    name: "branch",
                    prompt: "Send the branch, or - for the default (main):",
                    optional: true,
                },
                FieldSpec {
                    name: "start_command",
                    prompt: "Send the start command, or - to skip:",
                    optional: true,
                },
            ],
            FlowKind::SetRepository => &[
                FieldSpec {
                    name: "repository",
                    prompt: "Send the repository URL (e.g. https://github.com/USER/REPO):",
                    optional: false,
                },
                FieldSpec {
                    name: "branch",
                    prompt: "Send the branch, or - for the default (main):",
                    optional: true,
                },
                FieldSpec {
                    name: "start_command",
                    prompt: "Send the start command, or - to skip:",
                    optional: true,
                },
            ],
            FlowKind::AddEnvVars => &[FieldSpec {
                name: "env_block",
                prompt: "Send env var lines like:\nKEY=VALUE\nOTHER=value\n\n(All lines are \
                         upserted in one batch.)",
                optional: false,
            }],
            FlowKind::DeleteEnvVar => &[FieldSpec {
                name: "key",
                prompt: "Send the exact env var key to delete:",
                optional: false,
            }],
        }
    }

    /// Short label used in progress and error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            FlowKind::CreateService => "Create service",
            FlowKind::SetRepository => "Set repository",
            FlowKind::AddEnvVars => "Add env vars",
            FlowKind::DeleteEnvVar => "Delete env var",
        }
    }
}

/// The in-flight multi-step operation of one user. At most one exists per
/// user at any time.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub kind: FlowKind,
    /// Target service, present once a service has been selected. Creation
    /// flows have no target.
    pub target: Option<String>,
    /// Ordinal position within the kind's field sequence.
    pub step: usize,
    /// Collected values in step order.
    pub fields: Vec<(String, String)>,
}

impl PendingAction {
    pub fn new(kind: FlowKind, target: Option<String>) -> Self {
        Self {
            kind,
            target,
            step: 0,
            fields: Vec::new(),
        }
    }

    /// The field the flow is currently waiting on, `None` once complete.
    pub fn current_field(&self) -> Option<&'static FieldSpec> {
        self.kind.fields().get(self.step)
    }

    pub fn is_complete(&self) -> bool {
        self.step >= self.kind.fields().len()
    }

    /// A collected value by field name. Skipped optional fields are stored
    /// as empty strings and reported as `None` here.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }
}

/// Parse a block of `KEY=VALUE` lines. Each line splits on the first `=`;
/// lines without one are skipped rather than failing the batch. Returns the
/// pairs in input order.
pub fn parse_env_block(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_flow_has_at_least_one_step() {
        for kind in [
            FlowKind::CreateService,
            FlowKind::SetRepository,
            FlowKind::AddEnvVars,
            FlowKind::DeleteEnvVar,
        ] {
            assert!(!kind.fields().is_empty(), "{kind:?} has no steps");
        }
    }

    #[test]
    fn field_lookup_skips_empty_values() {
        let mut action = PendingAction::new(FlowKind::CreateService, None);
        action.fields.push(("branch".to_string(), String::new()));
        action.fields.push(("name".to_string(), "demo".to_string()));

        assert_eq!(action.field("name"), Some("demo"));
        assert_eq!(action.field("branch"), None);
    }

    #[test]
    fn parse_env_block_splits_on_first_equals() {
        let pairs = parse_env_block("DATABASE_URL=postgres://u:p@host/db?x=1");
        assert_eq!(
            pairs,
            vec![(
                "DATABASE_URL".to_string(),
                "postgres://u:p@host/db?x=1".to_string()
            )]
        );
    }

    #[test]
    fn parse_env_block_skips_invalid_lines() {
        let pairs = parse_env_block("MY_KEY=123\nnot a pair\n=nokey\nOTHER=abc");
        assert_eq!(
            pairs,
            vec![
                ("MY_KEY".to_string(), "123".to_string()),
                ("OTHER".to_string(), "abc".to_string()),
            ]
        );
    }

    #[test]
    fn parse_env_block_empty_input_yields_nothing() {
        assert!(parse_env_block("").is_empty());
        assert!(parse_env_block("no separators here").is_empty());
    }
}
