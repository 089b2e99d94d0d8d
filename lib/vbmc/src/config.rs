// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration for one emulated BMC instance.
//!
//! The controller itself only needs the VM name; the credentials and bind
//! address are opaque here and are surfaced for the BMC front end that
//! embeds the controller.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::path::Path;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "password".to_string()
}

fn default_address() -> IpAddr {
    IpAddr::V6(Ipv6Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    623
}

/// Settings for one emulated BMC fronting one VM.
#[derive(Clone, Deserialize, PartialEq, Eq, Serialize)]
pub struct BmcConfig {
    /// Name of the hypervisor machine this BMC controls.
    pub vm_name: String,

    /// Username the front end should accept for IPMI authentication.
    #[serde(default = "default_username")]
    pub username: String,

    /// Password the front end should accept for IPMI authentication.
    #[serde(default = "default_password")]
    pub password: String,

    /// Address the front end should bind its IPMI listener to. The default
    /// binds both IPv4 and IPv6.
    #[serde(default = "default_address")]
    pub address: IpAddr,

    /// UDP port for the IPMI listener.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl BmcConfig {
    /// Configuration with default credentials and bind settings for the
    /// named VM.
    pub fn new<S: Into<String>>(vm_name: S) -> Self {
        Self {
            vm_name: vm_name.into(),
            username: default_username(),
            password: default_password(),
            address: default_address(),
            port: default_port(),
        }
    }
}

// Hand-written so the password never lands in logs.
impl fmt::Debug for BmcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BmcConfig")
            .field("vm_name", &self.vm_name)
            .field("username", &self.username)
            .field("password", &"***")
            .field("address", &self.address)
            .field("port", &self.port)
            .finish()
    }
}

/// Errors which may be returned when parsing a BMC configuration.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Cannot parse toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parses a TOML file into a configuration object.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<BmcConfig, ParseError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let cfg = toml::from_str::<BmcConfig>(&contents)?;
    Ok(cfg)
}
