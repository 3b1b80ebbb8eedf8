pub mod match_engine;
pub mod roster;
pub(crate) mod util;

pub use match_engine::{unprocessed_students, MatchResult, MatchType, StudentMatcher};
pub use roster::{import_roster, RosterError};
