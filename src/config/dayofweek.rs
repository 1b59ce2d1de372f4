use anyhow::anyhow;
use chrono::Weekday;
use nom::{branch::alt, bytes::complete::tag_no_case, combinator::value};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Weekday as written on the clock-in schedule: L M X J V S D
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum DayOfWeek {
    Lun,
    Mar,
    Mie,
    Jue,
    Vie,
    Sab,
    Dom,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        Self::Lun,
        Self::Mar,
        Self::Mie,
        Self::Jue,
        Self::Vie,
        Self::Sab,
        Self::Dom,
    ];

    pub const WORKDAYS: [DayOfWeek; 5] = [Self::Lun, Self::Mar, Self::Mie, Self::Jue, Self::Vie];

    pub fn parse(input: &str) -> nom::IResult<&str, Self> {
        alt((
            value(Self::Lun, tag_no_case("L")),
            value(Self::Mar, tag_no_case("M")),
            value(Self::Mie, tag_no_case("X")),
            value(Self::Jue, tag_no_case("J")),
            value(Self::Vie, tag_no_case("V")),
            value(Self::Sab, tag_no_case("S")),
            value(Self::Dom, tag_no_case("D")),
        ))(input)
    }

    pub fn letter(self) -> char {
        match self {
            Self::Lun => 'L',
            Self::Mar => 'M',
            Self::Mie => 'X',
            Self::Jue => 'J',
            Self::Vie => 'V',
            Self::Sab => 'S',
            Self::Dom => 'D',
        }
    }

    pub fn full_name(self) -> &'static str {
        match self {
            Self::Lun => "Lunes",
            Self::Mar => "Martes",
            Self::Mie => "Miércoles",
            Self::Jue => "Jueves",
            Self::Vie => "Viernes",
            Self::Sab => "Sábado",
            Self::Dom => "Domingo",
        }
    }

    pub fn to_weekday(self) -> Weekday {
        match self {
            Self::Lun => Weekday::Mon,
            Self::Mar => Weekday::Tue,
            Self::Mie => Weekday::Wed,
            Self::Jue => Weekday::Thu,
            Self::Vie => Weekday::Fri,
            Self::Sab => Weekday::Sat,
            Self::Dom => Weekday::Sun,
        }
    }

    pub fn from_weekday(day: Weekday) -> Self {
        match day {
            Weekday::Mon => Self::Lun,
            Weekday::Tue => Self::Mar,
            Weekday::Wed => Self::Mie,
            Weekday::Thu => Self::Jue,
            Weekday::Fri => Self::Vie,
            Weekday::Sat => Self::Sab,
            Weekday::Sun => Self::Dom,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl TryFrom<char> for DayOfWeek {
    type Error = anyhow::Error;

    fn try_from(c: char) -> std::result::Result<Self, Self::Error> {
        match c.to_ascii_uppercase() {
            'L' => Ok(Self::Lun),
            'M' => Ok(Self::Mar),
            'X' => Ok(Self::Mie),
            'J' => Ok(Self::Jue),
            'V' => Ok(Self::Vie),
            'S' => Ok(Self::Sab),
            'D' => Ok(Self::Dom),
            _ => Err(anyhow!("Invalid day of week: '{}', expected one of L M X J V S D", c)),
        }
    }
}

impl TryFrom<&str> for DayOfWeek {
    type Error = anyhow::Error;

    fn try_from(input: &str) -> std::result::Result<Self, Self::Error> {
        let mut chars = input.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::try_from(c),
            _ => Err(anyhow!("Invalid day of week: '{}'", input)),
        }
    }
}

impl Serialize for DayOfWeek {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DayOfWeek {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DayOfWeek::try_from(s.as_str()).map_err(serde::de::Error::custom)
    }
}
