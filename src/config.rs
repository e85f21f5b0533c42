//! Bind-address parsing for the single optional CLI argument.

use crate::error::ConfigError;

pub const DEFAULT_BIND: &str = ":8800";

/// Parses a `:PORT` argument into a `0.0.0.0:PORT` socket address. Anything
/// before the leading `:` is ignored; the argument must start with `:`.
pub fn parse_bind_addr(arg: &str) -> Result<std::net::SocketAddrV4, ConfigError> {
    let port_str = arg
        .strip_prefix(':')
        .ok_or_else(|| ConfigError::MissingColon(arg.to_owned()))?;
    let port: u16 = port_str
        .parse()
        .map_err(|_| ConfigError::InvalidPort(arg.to_owned()))?;
    Ok(std::net::SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, port))
}

/// Reads the relay's bind address from `argv[1]`, falling back to the
/// default `:8800` when no argument was given.
pub fn bind_addr_from_args(mut args: impl Iterator<Item = String>) -> Result<std::net::SocketAddrV4, ConfigError> {
    args.next(); // argv[0]
    let arg = args.next().unwrap_or_else(|| DEFAULT_BIND.to_owned());
    parse_bind_addr(&arg)
}
