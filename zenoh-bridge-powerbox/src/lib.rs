//! Zenoh bridge for a Modbus ventilation unit.
//!
//! External actors write to command topics; the bridge turns each command
//! into a register write. Poll schedules read registers and publish the
//! scaled values back. All device access goes through a single
//! [`queue::TransactionQueue`] worker, since the device tolerates only one
//! open connection at a time.
//!
//! # Key Expressions
//!
//! ```text
//! <key_prefix>/<point>        commands in, readings out
//! <key_prefix>/@/status       bridge status
//! ```
//!
//! Where `<point>` is one of `operating_mode`, `boost_ventilation`,
//! `ventilation_level`, `room_temperature`, `outside_temperature` or
//! `humidity`.
//!
//! Readings share their topic with commands. Every sample the bridge
//! publishes carries a `{"self":"true"}` attachment, and samples with that
//! attachment are never treated as commands.

pub mod bridge;
pub mod bus;
pub mod config;
pub mod device;
pub mod ingest;
pub mod point;
pub mod publish;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod worker;
