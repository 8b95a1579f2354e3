use std::io::Write;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use crate::drivers::PipelineError;
use crate::types::TriggerCommand;
/// Writes are allowed to block this long, which is effectively forever for a
/// one-byte command.
const BLOCKING_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
/// Serial link parameters and the two single-character commands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub rising: char,
    pub falling: char,
}
impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            rising: 'H',
            falling: 'L',
        }
    }
}
impl SerialConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.rising.is_ascii() || !self.falling.is_ascii() || self.rising == self.falling {
            return Err(PipelineError::InvalidConfig(format!(
                "actuator commands must be two distinct ASCII characters (got {:?} / {:?})",
                self.rising, self.falling
            )));
        }
        if self.baud_rate == 0 {
            return Err(PipelineError::InvalidConfig("baud rate must be non-zero".into()));
        }
        Ok(())
    }
}
/// Byte sink that drives the external actuator: one ASCII character per
/// trigger transition.
pub struct ActuatorPort<W: Write> {
    writer: Option<W>,
    rising: u8,
    falling: u8,
    sent: u64,
}
impl ActuatorPort<Box<dyn SerialPort>> {
    /// Opens the serial device once with blocking writes.
    pub fn open_serial(config: &SerialConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let port = serialport::new(config.port.as_str(), config.baud_rate)
            .timeout(BLOCKING_TIMEOUT)
            .open()
            .map_err(|source| PipelineError::SerialOpen {
                path: config.port.clone(),
                source,
            })?;
        log::info!(
            "serial actuator open on {} at {} baud",
            config.port,
            config.baud_rate
        );
        Self::new(port, config)
    }
}
impl<W: Write> ActuatorPort<W> {
    /// Rejects command characters that do not fit in one ASCII byte.
    pub fn new(writer: W, config: &SerialConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            writer: Some(writer),
            rising: config.rising as u8,
            falling: config.falling as u8,
            sent: 0,
        })
    }
    pub fn command_byte(&self, command: TriggerCommand) -> u8 {
        match command {
            TriggerCommand::Rising => self.rising,
            TriggerCommand::Falling => self.falling,
        }
    }
    /// Sends exactly one byte. No retry: any failure is returned as is.
    pub fn send(&mut self, command: TriggerCommand) -> Result<(), PipelineError> {
        let byte = self.command_byte(command);
        let writer = self.writer.as_mut().ok_or(PipelineError::ActuatorClosed)?;
        writer
            .write_all(&[byte])
            .map_err(PipelineError::ActuatorWrite)?;
        writer.flush().map_err(PipelineError::ActuatorWrite)?;
        self.sent += 1;
        log::debug!("actuator <- {:?} ({})", command, byte as char);
        Ok(())
    }
    pub fn sent(&self) -> u64 {
        self.sent
    }
    #[cfg(test)]
    pub fn get_ref(&self) -> Option<&W> {
        self.writer.as_ref()
    }
    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
    /// Releases the underlying device; later sends fail.
    pub fn close(&mut self) -> Result<(), PipelineError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(PipelineError::ActuatorWrite)?;
            log::info!("actuator port closed after {} commands", self.sent);
        }
        Ok(())
    }
}
