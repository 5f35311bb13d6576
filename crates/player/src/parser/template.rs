//! `$Identifier$` substitution of DASH `SegmentTemplate` attributes.

use std::sync::LazyLock;

use regex::{Captures, Regex};

// Only `%0<width>d` is allowed as a format tag.
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(RepresentationID|Number|Time|Bandwidth)?(?:%0(\d+)d)?\$").unwrap()
});

/// Values available to one template expansion.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TemplateVars<'a> {
    pub representation_id: &'a str,
    pub bandwidth: u64,
    pub number: Option<u64>,
    pub time: Option<u64>,
}

impl TemplateVars<'_> {
    fn lookup(&self, identifier: &str) -> Option<String> {
        match identifier {
            "RepresentationID" => Some(self.representation_id.to_string()),
            "Bandwidth" => Some(self.bandwidth.to_string()),
            "Number" => self.number.map(|n| n.to_string()),
            "Time" => self.time.map(|t| t.to_string()),
            _ => None,
        }
    }

    pub fn expand(&self, template: &str) -> String {
        IDENTIFIER
            .replace_all(template, |caps: &Captures<'_>| {
                let Some(identifier) = caps.get(1) else {
                    // `$$` is an escaped dollar sign
                    return "$".to_string();
                };
                let Some(value) = self.lookup(identifier.as_str()) else {
                    return caps[0].to_string();
                };
                match caps.get(2).and_then(|w| w.as_str().parse::<usize>().ok()) {
                    Some(width) => format!("{value:0>width$}"),
                    None => value,
                }
            })
            .into_owned()
    }
}
