//! Target Matcher (C4) and Customizer (C5): projects a Bundle onto the
//! clusters it targets, then customizes the merged deployment options with
//! cluster-label and template substitution (spec §4.4, §4.5).

pub mod customize;
pub mod matcher;
