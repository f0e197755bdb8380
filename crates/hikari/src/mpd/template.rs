use std::sync::LazyLock;

use regex::{Captures, Regex};

// From https://dashif.org/docs/DASH-IF-IOP-v4.3.pdf:
// "For the avoidance of doubt, only %0[width]d is permitted and no other identifiers."
//
// Example template: "master_$RepresentationID$_$Number%05d$.m4s"
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(RepresentationID|Number|Time|Bandwidth)(?:%0(\d+)d)?\$").unwrap()
});

/// Values substituted into a `SegmentTemplate` URL pattern.
///
/// Identifiers without a value are left untouched, so a pattern can be
/// partially expanded and inspected.
#[derive(Debug, Clone, Default)]
pub struct Template {
    pub representation_id: Option<String>,
    pub bandwidth: Option<u64>,
    pub number: Option<u64>,
    pub time: Option<u64>,
}

impl Template {
    pub fn resolve(&self, pattern: &str) -> String {
        TEMPLATE_REGEX
            .replace_all(pattern, |caps: &Captures| {
                let value = match caps.get(1).unwrap().as_str() {
                    "RepresentationID" => self.representation_id.clone(),
                    "Number" => self.number.map(|number| number.to_string()),
                    "Time" => self.time.map(|time| time.to_string()),
                    "Bandwidth" => self.bandwidth.map(|bandwidth| bandwidth.to_string()),
                    _ => None,
                };
                let Some(value) = value else {
                    return caps.get(0).unwrap().as_str().to_string();
                };

                match caps.get(2) {
                    Some(width) => {
                        let width = width.as_str().parse().unwrap_or(0);
                        format!("{value:0>width$}")
                    }
                    None => value,
                }
            })
            .to_string()
    }
}
