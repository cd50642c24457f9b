//! Transport implementations.
//!
//! Hardware transports live outside this crate and plug in through
//! [`DeviceProvider`](crate::discovery::DeviceProvider). The simulated
//! transport here models a DAC's point FIFO in-process, for tests and demos.

pub mod simulated;
