
// External data representation, a protocol for serializing data to be sent over the network
pub mod xdr;

// Remote procedure call, a protocol build on top of XDR to provide something like C-style function calls over the network
pub mod rpc;

// A protocol using RPC that's meant to communicate with instruments, here mostly GPIB instruments sitting behind a
// LAN/GPIB gateway
pub mod vxi11;

// VISA-style resource strings and how they map onto VXI-11 links
pub mod visa;

// Anything that can take a SCPI command and answer a query
pub mod instrument;

// Set-point sequences for voltage sweeps
pub mod sweep;

// Reading buffers, data-element schemas and the 2D tables they turn into
pub mod table;

// Least squares fitting for I-V curves
pub mod fit;

// Instrument drivers, one module per model
pub mod devices;

// Loops that step a source and collect readings
pub mod acquisition;

// Figures, workbooks and the settings that go with them
pub mod export;

// Per-run TOML configuration
pub mod config;

// Arguments and logging setup shared by the experiment binaries
pub mod cli;

pub mod error;

pub use error::{Error, Result};
pub use instrument::Instrument;
