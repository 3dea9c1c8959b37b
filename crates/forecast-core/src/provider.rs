//! Market data providers.

use std::fmt;
use std::str::FromStr;

/// Source of market bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Binance,
    Moex,
    Custom,
    /// Local deterministic generator, no network.
    Mock,
}

impl Provider {
    pub fn label(&self) -> &'static str {
        match self {
            Provider::Binance => "BINANCE",
            Provider::Moex => "MOEX",
            Provider::Custom => "CUSTOM",
            Provider::Mock => "MOCK",
        }
    }

    pub fn all() -> &'static [Provider] {
        &[Provider::Mock, Provider::Binance, Provider::Moex, Provider::Custom]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Provider {
    type Err = String;

    /// Case-insensitive parse of a provider label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Provider::all()
            .iter()
            .copied()
            .find(|p| p.label() == upper)
            .ok_or_else(|| format!("unsupported provider: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("binance".parse::<Provider>().unwrap(), Provider::Binance);
        assert_eq!("MOEX".parse::<Provider>().unwrap(), Provider::Moex);
        assert_eq!(" mock ".parse::<Provider>().unwrap(), Provider::Mock);
        assert!("nyse".parse::<Provider>().is_err());
    }
}
