//! # coopfsm
//!
//! A cooperative hierarchical state-machine engine for resource-constrained
//! devices: nested composite states, shallow and deep history, guarded
//! transition tables, per-state timeouts and publish/subscribe signal
//! distribution between machines.
//!
//! ## Quick Start
//!
//! ```rust
//! use coopfsm::{Handler, Signal, SignalId, StateMachine, Status, Transition};
//!
//! const GO: SignalId = SignalId(1);
//!
//! fn idle(_: &mut Handler<'_, ()>) -> Status {
//!     Status::Absent
//! }
//!
//! fn running(h: &mut Handler<'_, ()>) -> Status {
//!     match h.signal() {
//!         SignalId::ENTRY => Status::Success,
//!         _ => Status::Absent,
//!     }
//! }
//!
//! let mut sm = StateMachine::new(());
//! let idle_id = sm.add("idle", idle).unwrap();
//! let running_id = sm.add("running", running).unwrap();
//! sm.set_transitions(idle_id, [Transition::new(GO, running_id)]).unwrap();
//! sm.setup(idle, idle_id, None).unwrap();
//!
//! sm.run(Signal::none());
//! assert_eq!(sm.current(), Some(idle_id));
//!
//! assert!(sm.run(GO));
//! assert_eq!(sm.current(), Some(running_id));
//! ```
//!
//! ## Architecture
//!
//! - [`machine`] - topology, dispatch and the transition algorithm
//! - [`handler`] - per-dispatch context given to callbacks
//! - [`state`] - state ids, statuses, transition rows and timeout bindings
//! - [`queue`] - signal queue and per-machine inbox
//! - [`timeout`] - timer bank driven by state entry and exit
//! - [`broker`] - publish/subscribe index
//! - [`telemetry`] - serializable diagnostics snapshot

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod broker;
pub mod config;
pub mod error;
pub mod handler;
pub mod machine;
pub mod queue;
pub mod signal;
pub mod state;
pub mod telemetry;
pub mod timeout;
pub mod timer;

pub use broker::SignalBroker;
pub use error::FsmError;
pub use handler::Handler;
pub use machine::StateMachine;
pub use queue::{SignalQueue, SignalSender};
pub use signal::{Signal, SignalData, SignalId};
pub use state::{HistoryMode, StateId, Status, TimeoutBinding, TimeoutOptions, Transition};
pub use telemetry::{MachineSnapshot, TimeoutSnapshot};
pub use timeout::TimeoutSpec;
pub use timer::{Clock, ManualClock, SystemClock, Timer};
