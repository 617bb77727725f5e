//! Line-configuration boundary.
//!
//! Baud rate, framing and flow control are register writes specific to the
//! device class (CDC-ACM, FTDI, ...). The core only defines the boundary:
//! a settings bundle embedders can persist, and the [`LineControl`] trait a
//! class-specific collaborator implements. Settings are applied before data
//! flows; the core treats them as satisfied preconditions of `open`.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Data bits per character frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

/// Stop bits per character frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    OneAndHalf,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    None,
    RtsCts,
    DsrDtr,
    XonXoff,
}

/// One serial line profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl Default for LineSettings {
    /// 9600 8-N-1 without flow control.
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

/// Device-class-specific line configuration, implemented outside this crate.
///
/// Each setter validates and applies one parameter via whatever control
/// transfers the device class requires.
pub trait LineControl {
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;
    fn set_data_bits(&mut self, data_bits: DataBits) -> Result<()>;
    fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<()>;
    fn set_parity(&mut self, parity: Parity) -> Result<()>;
    fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<()>;
    fn set_break(&mut self, enabled: bool) -> Result<()>;

    /// Apply a full settings bundle, one parameter at a time.
    fn apply(&mut self, settings: &LineSettings) -> Result<()> {
        self.set_baud_rate(settings.baud_rate)?;
        self.set_data_bits(settings.data_bits)?;
        self.set_stop_bits(settings.stop_bits)?;
        self.set_parity(settings.parity)?;
        self.set_flow_control(settings.flow_control)?;
        Ok(())
    }
}
