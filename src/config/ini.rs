use anyhow::{anyhow, bail, Result};
use nom::{
    bytes::complete::{tag, take_till1},
    character::complete::{one_of, space0},
    combinator::{all_consuming, rest},
    sequence::{delimited, separated_pair, terminated},
    IResult,
};
use std::collections::HashMap;

/// Parsed INI document. Section names keep their case, keys are lower-cased.
#[derive(Debug, Clone, Default)]
pub struct Ini {
    sections: HashMap<String, HashMap<String, String>>,
}

impl Ini {
    pub fn section(&self, name: &str) -> Option<&HashMap<String, String>> {
        self.sections.get(name)
    }

    /// Trimmed value, `None` when the section or key is missing
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)
            .and_then(|s| s.get(&key.to_lowercase()))
            .map(|v| v.as_str())
    }
}

enum Line<'a> {
    Blank,
    Section(&'a str),
    Entry(&'a str, &'a str),
}

fn section_header(i: &str) -> IResult<&str, &str> {
    all_consuming(terminated(
        delimited(tag("["), take_till1(|c| c == ']'), tag("]")),
        space0,
    ))(i)
}

fn entry(i: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(take_till1(|c| c == '=' || c == ':'), one_of("=:"), rest)(i)
}

fn parse_line(line: &str) -> Option<Line<'_>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
        return Some(Line::Blank);
    }
    if let Ok((_, name)) = section_header(line) {
        return Some(Line::Section(name.trim()));
    }
    if let Ok((_, (key, value))) = entry(line) {
        let key = key.trim();
        if !key.is_empty() {
            return Some(Line::Entry(key, value.trim()));
        }
    }
    None
}

pub fn parse_ini(input: &str) -> Result<Ini> {
    let mut ini = Ini::default();
    let mut current: Option<String> = None;

    for (n, raw) in input.lines().enumerate() {
        let line = parse_line(raw).ok_or_else(|| anyhow!("Line {}: unable to parse '{}'", n + 1, raw.trim()))?;

        match line {
            Line::Blank => {}
            Line::Section(name) => {
                ini.sections.entry(name.to_string()).or_default();
                current = Some(name.to_string());
            }
            Line::Entry(key, value) => {
                let Some(section) = &current else {
                    bail!("Line {}: key '{}' defined outside of any section", n + 1, key);
                };
                ini.sections
                    .entry(section.clone())
                    .or_default()
                    .insert(key.to_lowercase(), value.to_string());
            }
        }
    }

    Ok(ini)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections_and_entries() {
        let ini = parse_ini(
            "; notificaciones\n\
             [telegram]\n\
             token = 123:abc\n\
             chat_id: 42\n\
             \n\
             # email\n\
             [email]\n\
             SMTP_Server = smtp.example.com\n\
             email_password = p=ss\n",
        )
        .unwrap();

        assert_eq!(ini.get("telegram", "token"), Some("123:abc"));
        assert_eq!(ini.get("telegram", "chat_id"), Some("42"));
        assert_eq!(ini.get("email", "smtp_server"), Some("smtp.example.com"));
        // Only the first separator splits the entry
        assert_eq!(ini.get("email", "email_password"), Some("p=ss"));
        assert_eq!(ini.get("email", "missing"), None);
        assert!(ini.section("slack").is_none());
    }

    #[test]
    fn test_empty_values_are_kept() {
        let ini = parse_ini("[telegram]\ntoken =\n").unwrap();
        assert_eq!(ini.get("telegram", "token"), Some(""));
    }

    #[test]
    fn test_rejects_entries_outside_sections() {
        let err = parse_ini("token = x\n").unwrap_err();
        assert!(err.to_string().contains("outside of any section"));
    }

    #[test]
    fn test_rejects_garbage_lines() {
        let err = parse_ini("[telegram]\njust some words\n").unwrap_err();
        assert!(err.to_string().starts_with("Line 2"));
    }
}
