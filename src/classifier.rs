//! Decides whether a clock-in went through by looking at the page shown after
//! submitting it.
//!
//! Phrase tiers are checked in order and the first hit wins. Explicit success
//! messages outrank failure messages, because the portal keeps generic error
//! text in its markup next to a genuine confirmation banner.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Exact confirmation messages shown by the portal (and its misspelt variant)
const HIGH_PRIORITY_SUCCESS: &[&str] = &[
    "el fichaje se a realizado correctamente",
    "el fichaje se ha realizado correctamente",
    "fichaje se a realizado correctamente",
    "fichaje se ha realizado correctamente",
    "se a realizado correctamente",
    "se ha realizado correctamente",
];

const EXPLICIT_FAILURE: &[&str] = &[
    "error al realizar",
    "error en el fichaje",
    "fichaje incorrecto",
    "fichaje fallido",
    "no se pudo realizar",
    "operación fallida",
    "fichaje rechazado",
    "no se ha podido",
    "ha ocurrido un error",
];

const MEDIUM_PRIORITY_SUCCESS: &[&str] = &[
    "fichaje realizado",
    "fichaje añadido",
    "fichaje registrado",
    "añadido con éxito",
    "registrado con éxito",
    "realizado con éxito",
    "fichaje correcto",
    "operación exitosa",
    "guardado correctamente",
];

const LOW_PRIORITY_SUCCESS: &[&str] = &["éxito", "exitoso", "correctamente", "confirmado", "completado"];

const TITLE_KEYWORDS: &[&str] = &["éxito", "correcto", "confirmado", "realizado"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure,
    Unknown,
}

/// Which group of phrases produced the verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    HighSuccess,
    ExplicitFailure,
    MediumSuccess,
    LowSuccess,
    Title,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::HighSuccess => "high priority",
            Tier::ExplicitFailure => "explicit failure",
            Tier::MediumSuccess => "medium priority",
            Tier::LowSuccess => "low priority",
            Tier::Title => "page title",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub verdict: Verdict,
    pub tier: Option<Tier>,
    pub phrase: Option<&'static str>,
}

impl Classification {
    const UNKNOWN: Classification = Classification {
        verdict: Verdict::Unknown,
        tier: None,
        phrase: None,
    };

    fn hit(verdict: Verdict, tier: Tier, phrase: &'static str) -> Self {
        Self {
            verdict,
            tier: Some(tier),
            phrase: Some(phrase),
        }
    }
}

/// Lower-cases and collapses whitespace runs so that line breaks inside the
/// markup do not split a phrase.
pub fn normalize_text(text: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
    re.replace_all(&text.to_lowercase(), " ").into_owned()
}

fn first_match(text: &str, phrases: &[&'static str]) -> Option<&'static str> {
    phrases.iter().copied().find(|phrase| text.contains(phrase))
}

pub fn classify(page_text: &str, title: &str) -> Classification {
    let text = normalize_text(page_text);

    let body_tiers: [(Tier, Verdict, &[&'static str]); 4] = [
        (Tier::HighSuccess, Verdict::Success, HIGH_PRIORITY_SUCCESS),
        (Tier::ExplicitFailure, Verdict::Failure, EXPLICIT_FAILURE),
        (Tier::MediumSuccess, Verdict::Success, MEDIUM_PRIORITY_SUCCESS),
        (Tier::LowSuccess, Verdict::Success, LOW_PRIORITY_SUCCESS),
    ];

    for (tier, verdict, phrases) in body_tiers {
        if let Some(phrase) = first_match(&text, phrases) {
            return Classification::hit(verdict, tier, phrase);
        }
    }

    let title = normalize_text(title);
    if let Some(keyword) = first_match(&title, TITLE_KEYWORDS) {
        return Classification::hit(Verdict::Success, Tier::Title, keyword);
    }

    Classification::UNKNOWN
}
