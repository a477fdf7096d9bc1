use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Visual style of a timeline marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarkerStyle {
    #[default]
    Default,
    Info,
    Success,
    Warning,
    Danger,
}

impl MarkerStyle {
    pub const ALL: [MarkerStyle; 5] = [
        MarkerStyle::Default,
        MarkerStyle::Info,
        MarkerStyle::Success,
        MarkerStyle::Warning,
        MarkerStyle::Danger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerStyle::Default => "default",
            MarkerStyle::Info => "info",
            MarkerStyle::Success => "success",
            MarkerStyle::Warning => "warning",
            MarkerStyle::Danger => "danger",
        }
    }
}

impl fmt::Display for MarkerStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarkerStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MarkerStyle::ALL
            .iter()
            .copied()
            .find(|style| style.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "Unknown marker style '{}', expected one of: default, info, success, warning, danger",
                    s
                )
            })
    }
}

impl ToSql for MarkerStyle {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MarkerStyle {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_closed_set() {
        for style in MarkerStyle::ALL {
            assert_eq!(style.as_str().parse::<MarkerStyle>().unwrap(), style);
        }
        assert!("critical".parse::<MarkerStyle>().is_err());
        assert!("Warning".parse::<MarkerStyle>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&MarkerStyle::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
        let style: MarkerStyle = serde_json::from_str("\"danger\"").unwrap();
        assert_eq!(style, MarkerStyle::Danger);
    }
}
