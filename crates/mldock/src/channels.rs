//! Environment-driven channel discovery.
//!
//! A channel is an environment variable such as `MLDOCK_INPUT_CHANNEL_IRIS`
//! whose value is the remote URI synced with a fixed local directory.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use regex::Regex;

use crate::container::ContainerSettings;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub key: String,
    pub value: String,
}

/// Entries whose key matches `pattern` starting at the first character,
/// ordered by key.
pub fn discover(env: &BTreeMap<String, String>, pattern: &Regex) -> Vec<EnvEntry> {
    env.iter()
        .filter(|(k, _)| pattern.find(k).is_some_and(|m| m.start() == 0))
        .map(|(k, v)| EnvEntry {
            key: k.clone(),
            value: v.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    InputData,
    OutputData,
    ModelInput,
    ModelOutput,
}

impl ChannelKind {
    /// Key stem following `<PREFIX>_`.
    pub fn stem(self) -> &'static str {
        match self {
            ChannelKind::InputData => "INPUT_CHANNEL",
            ChannelKind::OutputData => "OUTPUT_CHANNEL",
            ChannelKind::ModelInput => "MODEL_INPUT_CHANNEL",
            ChannelKind::ModelOutput => "MODEL_OUTPUT_CHANNEL",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            ChannelKind::InputData | ChannelKind::ModelInput => Direction::Input,
            ChannelKind::OutputData | ChannelKind::ModelOutput => Direction::Output,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelKind::InputData => "input",
            ChannelKind::OutputData => "output",
            ChannelKind::ModelInput => "model-input",
            ChannelKind::ModelOutput => "model-output",
        };
        write!(f, "{s}")
    }
}

/// The four channel key patterns for one environment prefix.
#[derive(Debug, Clone)]
pub struct ChannelPatterns {
    prefix: String,
    input: Regex,
    output: Regex,
    model_input: Regex,
    model_output: Regex,
}

impl ChannelPatterns {
    pub fn new(prefix: &str) -> Result<Self> {
        let p = regex::escape(prefix);
        let build = |body: String| {
            Regex::new(&body).map_err(|e| Error::msg(format!("invalid channel pattern {body}: {e}")))
        };
        Ok(Self {
            prefix: prefix.to_string(),
            input: build(format!("{p}_INPUT_CHANNEL_.*"))?,
            output: build(format!("{p}_OUTPUT_CHANNEL_.*"))?,
            model_input: build(format!("{p}_MODEL_INPUT_CHANNEL.*"))?,
            model_output: build(format!("{p}_MODEL_OUTPUT_CHANNEL.*"))?,
        })
    }

    pub fn pattern(&self, kind: ChannelKind) -> &Regex {
        match kind {
            ChannelKind::InputData => &self.input,
            ChannelKind::OutputData => &self.output,
            ChannelKind::ModelInput => &self.model_input,
            ChannelKind::ModelOutput => &self.model_output,
        }
    }

    /// Local directory name for a channel key: the kind's stem removed,
    /// leading `_` dropped, lower-cased.
    pub fn channel_name(&self, key: &str, kind: ChannelKind) -> String {
        let stem = format!("{}_{}", self.prefix, kind.stem());
        let rest = key.strip_prefix(stem.as_str()).unwrap_or(key);
        rest.strip_prefix('_').unwrap_or(rest).to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub key: String,
    pub name: String,
    pub kind: ChannelKind,
    pub direction: Direction,
    pub local_path: PathBuf,
    pub remote_uri: String,
}

/// Channels of `kind` declared in `env`, bound to their local directories.
pub fn discover_channels(
    env: &BTreeMap<String, String>,
    kind: ChannelKind,
    settings: &ContainerSettings,
) -> Result<Vec<Channel>> {
    let patterns = ChannelPatterns::new(&settings.prefix)?;
    let base = settings.layout().channel_base(kind);
    Ok(discover(env, patterns.pattern(kind))
        .into_iter()
        .map(|entry| {
            let name = patterns.channel_name(&entry.key, kind);
            Channel {
                local_path: base.join(&name),
                name,
                kind,
                direction: kind.direction(),
                key: entry.key,
                remote_uri: entry.value,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn discovery_is_anchored_and_sorted() {
        let env = env(&[
            ("MLDOCK_INPUT_CHANNEL_FOO_EXTRA", "s3://y"),
            ("MLDOCK_INPUT_CHANNEL_FOO", "s3://x"),
            ("OTHER_VAR", "z"),
            ("X_MLDOCK_INPUT_CHANNEL_BAR", "s3://w"),
        ]);
        let re = Regex::new("MLDOCK_INPUT_CHANNEL_.*").expect("regex");
        let keys: Vec<_> = discover(&env, &re).into_iter().map(|e| e.key).collect();
        assert_eq!(
            keys,
            vec!["MLDOCK_INPUT_CHANNEL_FOO", "MLDOCK_INPUT_CHANNEL_FOO_EXTRA"]
        );
    }

    #[test]
    fn no_matches_is_empty() {
        let re = Regex::new("MLDOCK_OUTPUT_CHANNEL_.*").expect("regex");
        assert!(discover(&env(&[("PATH", "/bin")]), &re).is_empty());
    }

    #[test]
    fn kinds_do_not_overlap() {
        let patterns = ChannelPatterns::new("MLDOCK").expect("patterns");
        let env = env(&[
            ("MLDOCK_INPUT_CHANNEL_A", "1"),
            ("MLDOCK_MODEL_INPUT_CHANNEL_B", "2"),
            ("MLDOCK_OUTPUT_CHANNEL_C", "3"),
            ("MLDOCK_MODEL_OUTPUT_CHANNEL_D", "4"),
        ]);
        for (kind, key) in [
            (ChannelKind::InputData, "MLDOCK_INPUT_CHANNEL_A"),
            (ChannelKind::ModelInput, "MLDOCK_MODEL_INPUT_CHANNEL_B"),
            (ChannelKind::OutputData, "MLDOCK_OUTPUT_CHANNEL_C"),
            (ChannelKind::ModelOutput, "MLDOCK_MODEL_OUTPUT_CHANNEL_D"),
        ] {
            let found = discover(&env, patterns.pattern(kind));
            assert_eq!(found.len(), 1, "{kind}");
            assert_eq!(found[0].key, key);
        }
    }

    #[test]
    fn channel_names_are_lowercased_suffixes() {
        let patterns = ChannelPatterns::new("MLDOCK").expect("patterns");
        assert_eq!(
            patterns.channel_name("MLDOCK_INPUT_CHANNEL_IRIS", ChannelKind::InputData),
            "iris"
        );
        assert_eq!(
            patterns.channel_name("MLDOCK_MODEL_OUTPUT_CHANNEL", ChannelKind::ModelOutput),
            ""
        );
        assert_eq!(
            patterns.channel_name("MLDOCK_MODEL_INPUT_CHANNELX", ChannelKind::ModelInput),
            "x"
        );
    }

    #[test]
    fn custom_prefix_is_escaped() {
        let patterns = ChannelPatterns::new("MY.APP").expect("patterns");
        let env = env(&[
            ("MY.APP_INPUT_CHANNEL_A", "1"),
            ("MYXAPP_INPUT_CHANNEL_B", "2"),
        ]);
        let found = discover(&env, patterns.pattern(ChannelKind::InputData));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "MY.APP_INPUT_CHANNEL_A");
    }

    #[test]
    fn channels_bind_to_layout_dirs() {
        let mut e = env(&[("MLDOCK_INPUT_CHANNEL_IRIS", "/tmp/src")]);
        e.insert("MLDOCK_BASE_DIR".into(), "/work".into());
        let settings = ContainerSettings::from_env(&e);
        let channels = discover_channels(&e, ChannelKind::InputData, &settings).expect("discover");
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name, "iris");
        assert_eq!(channels[0].direction, Direction::Input);
        assert_eq!(channels[0].local_path, PathBuf::from("/work/input/data/iris"));
        assert_eq!(channels[0].remote_uri, "/tmp/src");
    }
}
