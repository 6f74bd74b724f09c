use tracing::{info, warn};

use crate::ledger::SaveOutcome;
use crate::markdown::{mention, normalize_mention};
use crate::relay::{DiscordMessage, RelayPipeline};

pub const DEFAULT_PREFIX: &str = "!";
pub const LEADERBOARD_SIZE: usize = 5;

/// Chat command verbs the bridge answers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Top,
    Rating,
    Adjust,
}

impl Verb {
    fn from_word(word: &str) -> Option<Self> {
        match word {
            "top5" => Some(Self::Top),
            "rating" => Some(Self::Rating),
            "adjust" => Some(Self::Adjust),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Top => "top5",
            Self::Rating => "rating",
            Self::Adjust => "adjust",
        }
    }

    pub fn requires_admin(self) -> bool {
        matches!(self, Self::Adjust)
    }
}

/// A fully validated command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Top,
    Rating { target: String },
    Adjust { target: String, delta: i64 },
}

/// Why a recognised verb could not be turned into a `Command`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    MissingArgs(Verb),
    BadDelta(String),
}

impl UsageError {
    pub fn reply(&self, prefix: &str) -> String {
        match self {
            Self::MissingArgs(Verb::Adjust) => format!(
                "❌ Usage: {prefix}adjust @user +10 or {prefix}adjust @user -10"
            ),
            Self::MissingArgs(Verb::Rating) => format!("❌ Usage: {prefix}rating @user"),
            Self::MissingArgs(Verb::Top) => format!("❌ Usage: {prefix}top5"),
            Self::BadDelta(raw) => format!("❌ '{raw}' is not a whole number of points."),
        }
    }
}

/// Output of the single parse step: the verb is always known so permission
/// checks can run before argument errors are reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub verb: Verb,
    pub command: Result<Command, UsageError>,
}

/// Parse `content` as a bridge command. `None` means "not a command", which
/// includes prefixed text with an unknown verb.
pub fn parse(prefix: &str, content: &str) -> Option<Invocation> {
    let body = content.trim_start().strip_prefix(prefix)?;
    let mut words = body.split_whitespace();
    let verb = Verb::from_word(words.next()?)?;
    let args: Vec<&str> = words.collect();

    let command = match verb {
        Verb::Top => Ok(Command::Top),
        Verb::Rating => match args.first() {
            Some(target) => Ok(Command::Rating {
                target: normalize_mention(target).to_string(),
            }),
            None => Err(UsageError::MissingArgs(verb)),
        },
        Verb::Adjust => match args.as_slice() {
            [target, delta, ..] => match delta.parse::<i64>() {
                Ok(delta) => Ok(Command::Adjust {
                    target: normalize_mention(target).to_string(),
                    delta,
                }),
                Err(_) => Err(UsageError::BadDelta(delta.to_string())),
            },
            _ => Err(UsageError::MissingArgs(verb)),
        },
    };

    Some(Invocation { verb, command })
}

pub fn render_leaderboard(users: &[crate::store::User]) -> String {
    if users.is_empty() {
        return "The leaderboard is empty.".to_string();
    }
    let mut out = format!("Top {}:\n", users.len());
    for (i, user) in users.iter().enumerate() {
        out.push_str(&format!("{}. {} - {} points\n", i + 1, mention(&user.id), user.rating));
    }
    out
}

impl RelayPipeline {
    /// Run a parsed command and answer in the Discord channel it came from.
    pub(crate) async fn handle_command(&self, msg: &DiscordMessage, invocation: Invocation) {
        info!(
            verb = invocation.verb.name(),
            caller = %msg.author_id,
            "received command"
        );
        self.metrics.record_command();

        let reply = self.execute(&msg.author_id, invocation).await;
        self.reply_discord(&msg.channel_id, &reply).await;
    }

    async fn execute(&self, caller: &str, invocation: Invocation) -> String {
        let prefix = &self.config.command_prefix;
        if invocation.verb.requires_admin() && !self.ledger.is_admin(caller) {
            warn!(caller, verb = invocation.verb.name(), "permission denied");
            return "❌ Only admins can adjust ratings.".to_string();
        }

        let command = match invocation.command {
            Ok(command) => command,
            Err(e) => return e.reply(prefix),
        };

        match command {
            Command::Top => render_leaderboard(&self.ledger.top_n(LEADERBOARD_SIZE)),
            Command::Rating { target } => {
                let rating = self.ledger.get_rating(&target);
                format!("{} has {} points.", mention(&target), rating)
            }
            Command::Adjust { target, delta } => {
                let rating = self.ledger.adjust_rating(&target, delta);
                info!(caller, target = %target, delta, rating, "rating adjusted by admin");
                let saved = self
                    .ledger
                    .clone()
                    .flush(self.config.store_path.clone())
                    .await;
                match saved {
                    Ok(SaveOutcome::Written) | Ok(SaveOutcome::Skipped) => format!(
                        "✅ Rating of {} changed by {:+} points (now {}).",
                        mention(&target),
                        delta,
                        rating
                    ),
                    Err(e) => {
                        warn!(error = %e, "failed to save ledger after adjustment");
                        format!(
                            "❌ Rating of {} changed to {} but could not be saved.",
                            mention(&target),
                            rating
                        )
                    }
                }
            }
        }
    }
}
