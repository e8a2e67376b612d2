use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// UDP port to listen on. 0 picks an ephemeral port.
    pub port: u16,
    /// Tick interval in milliseconds.
    pub timestep: u64,
    /// Optional `host:port` peer to connect to at startup.
    pub connect: Option<String>,
}

impl Config {
    pub fn from_file<P>(path: P) -> Result<Self, Box<dyn std::error::Error>>
    where
        P: AsRef<Path>,
    {
        let mut file = File::open(path)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let s = std::str::from_utf8(&buf)?;

        Ok(toml::from_str(s)?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 0,
            timestep: 50,
            connect: None,
        }
    }
}
