//! # Diamond Controller
//!
//! OpenFlow 1.0 controller for a four-switch diamond topology that balances
//! TCP flows across the two redundant rails between the edge switches.
//!
//! ## Architecture
//!
//! ```text
//!                      ┌────────┐
//!                      │   s2   │  top rail
//!       ┌────────┐ p1══p1      p2══p2 ┌────────┐
//!  h ═══│        │     └────────┘     │        │═══ h
//!  h ═══│   s1   │                    │   s4   │═══ h
//!  h ═══│        │     ┌────────┐     │        │═══ h
//!       └────────┘ p2══p1      p2══p1 └────────┘
//!                      │   s3   │  bottom rail
//!                      └────────┘
//!
//! ┌──────────────┐   ┌──────────────┐
//! │ OpenFlow TCP │   │ side channel │
//! │   sessions   │   │  (UDP/JSON)  │
//! └──────┬───────┘   └──────┬───────┘
//!        └────────┬─────────┘
//!                 ▼
//!        serialized event stream
//!                 │
//!        ┌────────┴────────┐
//!        ▼                 ▼
//!     Router           Balancer
//!  (MAC learning)   (rail selection)
//! ```
//!
//! Every state mutation happens on the single controller task; switch
//! sessions and the side channel only decode and forward events.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]      // Many functions can't be const due to trait bounds
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::cast_possible_truncation)]  // Wire lengths are bounded by u16 framing
#![allow(clippy::significant_drop_tightening)] // Lock ordering is intentional
#![allow(clippy::option_if_let_else)]        // More readable in context
#![allow(clippy::use_self)]                  // Explicit type names in matches
#![allow(clippy::redundant_pub_crate)]       // Explicit visibility
#![allow(clippy::too_many_lines)]            // Complete implementations
#![allow(clippy::match_same_arms)]           // Explicit arm per variant is clearer
#![allow(clippy::return_self_not_must_use)]  // Builder methods don't need must_use

pub mod balancer;
pub mod config;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod router;
pub mod server;
pub mod side_channel;
pub mod switch;
pub mod topology;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default port switches connect to.
pub const DEFAULT_OPENFLOW_PORT: u16 = 6633;

/// Default port for side-channel notifications.
pub const DEFAULT_SIDE_CHANNEL_PORT: u16 = 6634;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::balancer::{BalancerSnapshot, ConnectionBalancer};
    pub use crate::config::Config;
    pub use crate::controller::{Controller, ControllerEvent, EventHandler};
    pub use crate::error::{Error, Result};
    pub use crate::router::{MacTable, Router};
    pub use crate::server::ControllerService;
    pub use crate::side_channel::{FlowNotification, SideChannelListener};
    pub use crate::switch::{SwitchHandle, SwitchRegistry};
    pub use crate::topology::{Topology, TopologyConfig};
    pub use crate::types::*;
}
