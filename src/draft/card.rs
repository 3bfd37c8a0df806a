// Card pool data model: colors, reservation status, and pool rows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The five Commander colors. Every card in the pool belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Blue,
    Black,
    Red,
    Green,
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid color `{0}`; valid colors are white, blue, black, red, green")]
pub struct ParseColorError(pub String);

impl Color {
    pub const ALL: [Color; 5] = [
        Color::White,
        Color::Blue,
        Color::Black,
        Color::Red,
        Color::Green,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Color::White => "white",
            Color::Blue => "blue",
            Color::Black => "black",
            Color::Red => "red",
            Color::Green => "green",
        }
    }
}

impl FromStr for Color {
    type Err = ParseColorError;

    /// Case-insensitive, whitespace-tolerant parse. Clients and the sheet
    /// both spell colors with arbitrary casing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "white" => Ok(Color::White),
            "blue" => Ok(Color::Blue),
            "black" => Ok(Color::Black),
            "red" => Ok(Color::Red),
            "green" => Ok(Color::Green),
            _ => Err(ParseColorError(s.trim().to_string())),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reservation status of a single pool row.
///
/// The only transitions are Available -> Reserved (a successful pick) and
/// Reserved -> Available (an admin reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Available,
    Reserved,
}

/// One row of the card pool.
///
/// `reserved_by` is present iff `status` is Reserved. Owner names are stored
/// trimmed and lowercased; [`CardRecord::is_reserved_by`] compares the same
/// way so retried picks match regardless of client casing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
    pub name: String,
    pub color: Color,
    pub status: CardStatus,
    pub reserved_by: Option<String>,
}

impl CardRecord {
    /// A fresh, unreserved pool row.
    pub fn available(name: impl Into<String>, color: Color) -> Self {
        Self {
            name: name.into(),
            color,
            status: CardStatus::Available,
            reserved_by: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == CardStatus::Available
    }

    pub fn is_reserved_by(&self, user: &str) -> bool {
        self.reserved_by
            .as_deref()
            .is_some_and(|owner| owner.eq_ignore_ascii_case(user.trim()))
    }
}

/// Canonical form of a user identifier as recorded in the pool.
pub fn normalize_user(user: &str) -> String {
    user.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colors_case_insensitively() {
        assert_eq!("White".parse::<Color>().unwrap(), Color::White);
        assert_eq!("  BLUE ".parse::<Color>().unwrap(), Color::Blue);
        assert_eq!("green".parse::<Color>().unwrap(), Color::Green);
    }

    #[test]
    fn rejects_unknown_color() {
        let err = "colorless".parse::<Color>().unwrap_err();
        assert_eq!(err, ParseColorError("colorless".into()));
    }

    #[test]
    fn display_round_trips_through_parse() {
        for color in Color::ALL {
            assert_eq!(color.as_str().parse::<Color>().unwrap(), color);
        }
    }

    #[test]
    fn reserved_by_comparison_ignores_case_and_whitespace() {
        let mut card = CardRecord::available("Atraxa", Color::White);
        card.status = CardStatus::Reserved;
        card.reserved_by = Some("alice".into());

        assert!(card.is_reserved_by("Alice"));
        assert!(card.is_reserved_by("  alice "));
        assert!(!card.is_reserved_by("bob"));
    }

    #[test]
    fn available_card_is_reserved_by_nobody() {
        let card = CardRecord::available("Atraxa", Color::White);
        assert!(card.is_available());
        assert!(!card.is_reserved_by("alice"));
    }

    #[test]
    fn normalize_user_trims_and_lowercases() {
        assert_eq!(normalize_user("  Alice "), "alice");
    }
}
