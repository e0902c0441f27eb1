//! The security requirement advertised in the xrootd login response.
//!
//! Format: `&P=gsi,v:10400,c:ssl,ca:5c278efe|1a2b3c4d`.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;
use crate::protocol::constants::HASH_SEPARATOR;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityToken {
    pub protocol: String,
    pub version: u32,
    pub crypto_mode: String,
    pub ca_hashes: Vec<String>,
}

impl fmt::Display for SecurityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "&P={},v:{},c:{}",
            self.protocol, self.version, self.crypto_mode
        )?;
        if !self.ca_hashes.is_empty() {
            let hashes = self.ca_hashes.join(&HASH_SEPARATOR.to_string());
            write!(f, ",ca:{hashes}")?;
        }
        Ok(())
    }
}

impl FromStr for SecurityToken {
    type Err = ProtocolError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let body = token
            .strip_prefix("&P=")
            .ok_or_else(|| ProtocolError::BadToken(token.to_string()))?;
        let mut fields = body.split(',');
        let protocol = fields
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ProtocolError::BadToken(token.to_string()))?
            .to_string();

        let mut version = None;
        let mut crypto_mode = None;
        let mut ca_hashes = Vec::new();
        for field in fields {
            match field.split_once(':') {
                Some(("v", value)) => {
                    version = Some(
                        value
                            .parse()
                            .map_err(|_| ProtocolError::BadToken(token.to_string()))?,
                    )
                }
                Some(("c", value)) => crypto_mode = Some(value.to_string()),
                Some(("ca", value)) => {
                    ca_hashes = value
                        .split(HASH_SEPARATOR)
                        .filter(|h| !h.is_empty())
                        .map(str::to_string)
                        .collect()
                }
                // Unknown keys are ignored so newer servers can extend the token.
                _ => {}
            }
        }

        Ok(SecurityToken {
            protocol,
            version: version.ok_or_else(|| ProtocolError::BadToken(token.to_string()))?,
            crypto_mode: crypto_mode.unwrap_or_default(),
            ca_hashes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips() {
        let token: SecurityToken = "&P=gsi,v:10400,c:ssl,ca:5c278efe|1a2b3c4d".parse().unwrap();
        assert_eq!(token.protocol, "gsi");
        assert_eq!(token.version, 10400);
        assert_eq!(token.crypto_mode, "ssl");
        assert_eq!(token.ca_hashes, vec!["5c278efe", "1a2b3c4d"]);
        assert_eq!(token.to_string(), "&P=gsi,v:10400,c:ssl,ca:5c278efe|1a2b3c4d");
    }

    #[test]
    fn token_without_version_is_rejected() {
        assert!("&P=gsi,c:ssl".parse::<SecurityToken>().is_err());
        assert!("P=gsi,v:10400".parse::<SecurityToken>().is_err());
    }
}
