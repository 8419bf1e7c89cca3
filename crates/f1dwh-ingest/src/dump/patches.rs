//! Corrections for known defects in the upstream f1db dump

use f1dwh_common::FieldValue;

/// A single tuple the upstream dump is known to get wrong
struct KnownDefect {
    name: &'static str,
    found: &'static [&'static str],
    corrected: &'static [&'static str],
}

/// The BAR 007 chassis row is published under the 006 designation.
const BAR_007_CHASSIS: KnownDefect = KnownDefect {
    name: "bar_007_chassis",
    found: &["bar-007", "bar", "006", "BAR 006"],
    corrected: &["bar-007", "bar", "007", "BAR 007"],
};

impl KnownDefect {
    fn matches(&self, values: &[FieldValue]) -> bool {
        values.len() == self.found.len()
            && values
                .iter()
                .zip(self.found)
                .all(|(value, expected)| value.as_text() == Some(*expected))
    }
}

/// Replace the tuple with its corrected values when it is the known defect.
///
/// Returns the name of the applied correction, if any.
pub(crate) fn patch_known_defect(values: &mut Vec<FieldValue>) -> Option<&'static str> {
    if !BAR_007_CHASSIS.matches(values) {
        return None;
    }

    *values = BAR_007_CHASSIS
        .corrected
        .iter()
        .map(|v| FieldValue::from(*v))
        .collect();
    Some(BAR_007_CHASSIS.name)
}
