//! # RemindClaw Scheduler
//!
//! Turns an open WhatsApp connection into one dispatch cycle: today's contacts
//! are sent in session order under an hourly cap, each send is recorded in the
//! SQLite ledger so no contact is messaged twice for the same occurrence, and
//! per-agent stats are streamed to observers.
//!
//! [`BotControl`] bundles the operations exposed to operators.

pub mod clock;
pub mod control;
pub mod dispatch;
pub mod ledger;
pub mod rate;
pub mod template;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use control::{BotControl, BotStatus, StatsSummary};
pub use dispatch::{CycleReport, DispatchError, DispatchSettings, Dispatcher};
pub use ledger::SqliteLedger;
pub use rate::HourlyGovernor;
