//! Field-bus device access.
//!
//! A [`FieldDevice`] performs one register transaction per connection. The
//! transaction queue worker is the only caller, which is what keeps the
//! half-duplex link free of overlapping requests.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use crate::config::{ConnectionConfig, DeviceConfig};

/// Error type for device transactions.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Transfer failed: {0}")]
    Transfer(String),
    #[error("Device exception: {0}")]
    Exception(String),
    #[error("Unexpected response: {0}")]
    Protocol(String),
}

/// One-transaction-per-connection register access.
#[async_trait]
pub trait FieldDevice: Send + Sync + 'static {
    /// Open connection handle.
    type Connection: Send;

    async fn connect(&self) -> Result<Self::Connection, DeviceError>;

    /// Read one 16-bit register.
    async fn read(&self, conn: &mut Self::Connection, address: u16) -> Result<u16, DeviceError>;

    /// Write one 16-bit register.
    async fn write(
        &self,
        conn: &mut Self::Connection,
        address: u16,
        value: u16,
    ) -> Result<(), DeviceError>;

    async fn close(&self, conn: Self::Connection) -> Result<(), DeviceError>;

    /// Human-readable address for logs and status.
    fn describe(&self) -> String;
}

/// Modbus TCP/RTU device reached through `tokio-modbus`.
#[derive(Debug, Clone)]
pub struct ModbusDevice {
    connection: ConnectionConfig,
    unit_id: u8,
}

impl ModbusDevice {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            connection: config.connection.clone(),
            unit_id: config.unit_id,
        }
    }

    async fn resolve(host: &str, port: u16) -> Result<SocketAddr, DeviceError> {
        tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| DeviceError::Connection(format!("Cannot resolve {}: {}", host, e)))?
            .next()
            .ok_or_else(|| DeviceError::Connection(format!("No address for {}", host)))
    }
}

#[async_trait]
impl FieldDevice for ModbusDevice {
    type Connection = Context;

    async fn connect(&self) -> Result<Context, DeviceError> {
        let slave = Slave(self.unit_id);

        match &self.connection {
            ConnectionConfig::Tcp { host, port } => {
                let addr = Self::resolve(host, *port).await?;
                tcp::connect_slave(addr, slave)
                    .await
                    .map_err(|e| DeviceError::Connection(e.to_string()))
            }
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                let parity = match parity.to_lowercase().as_str() {
                    "even" => tokio_serial::Parity::Even,
                    "odd" => tokio_serial::Parity::Odd,
                    _ => tokio_serial::Parity::None,
                };

                let stop_bits = match stop_bits {
                    2 => tokio_serial::StopBits::Two,
                    _ => tokio_serial::StopBits::One,
                };

                let data_bits = match data_bits {
                    5 => tokio_serial::DataBits::Five,
                    6 => tokio_serial::DataBits::Six,
                    7 => tokio_serial::DataBits::Seven,
                    _ => tokio_serial::DataBits::Eight,
                };

                let builder = tokio_serial::new(port, *baud_rate)
                    .parity(parity)
                    .stop_bits(stop_bits)
                    .data_bits(data_bits);

                let serial = tokio_serial::SerialStream::open(&builder)
                    .map_err(|e| DeviceError::Connection(format!("Serial open failed: {}", e)))?;

                Ok(rtu::attach_slave(serial, slave))
            }
        }
    }

    async fn read(&self, ctx: &mut Context, address: u16) -> Result<u16, DeviceError> {
        let words = ctx
            .read_holding_registers(address, 1)
            .await
            .map_err(|e| DeviceError::Transfer(e.to_string()))?
            .map_err(|e| DeviceError::Exception(format!("{:?}", e)))?;

        match words.as_slice() {
            [word] => Ok(*word),
            other => Err(DeviceError::Protocol(format!(
                "expected 1 register at {}, got {}",
                address,
                other.len()
            ))),
        }
    }

    async fn write(&self, ctx: &mut Context, address: u16, value: u16) -> Result<(), DeviceError> {
        ctx.write_single_register(address, value)
            .await
            .map_err(|e| DeviceError::Transfer(e.to_string()))?
            .map_err(|e| DeviceError::Exception(format!("{:?}", e)))
    }

    async fn close(&self, mut ctx: Context) -> Result<(), DeviceError> {
        ctx.disconnect()
            .await
            .map_err(|e| DeviceError::Connection(format!("Disconnect failed: {}", e)))
    }

    fn describe(&self) -> String {
        format!("{} unit {}", self.connection, self.unit_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let device = ModbusDevice::new(&DeviceConfig::default());
        assert_eq!(device.describe(), "tcp://192.168.0.234:502 unit 10");
    }

    #[tokio::test]
    async fn test_resolve_numeric_host() {
        let addr = ModbusDevice::resolve("127.0.0.1", 502).await.unwrap();
        assert_eq!(addr, "127.0.0.1:502".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Port 1 on loopback is closed on any sane test host.
        let device = ModbusDevice {
            connection: ConnectionConfig::Tcp {
                host: "127.0.0.1".to_string(),
                port: 1,
            },
            unit_id: 1,
        };
        let result = device.connect().await;
        assert!(matches!(result, Err(DeviceError::Connection(_))));
    }
}
