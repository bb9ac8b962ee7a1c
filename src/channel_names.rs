/*
 * This file is part of liquidctl-bridge.
 *
 * Copyright (C) 2025 liquidctl-bridge contributors
 *
 * liquidctl-bridge is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * liquidctl-bridge is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with liquidctl-bridge. If not, see <https://www.gnu.org/licenses/>.
 */

//! Channel key normalization
//!
//! Pure helpers that turn the helper's free-form channel keys ("Fan 1 duty",
//! "Pump speed") into write channel names, display labels and sensor ids.

use lazy_static::lazy_static;
use regex::Regex;

/// One normalization rule: a key pattern and the canonical name it expands to.
/// Templates may reference named captures, e.g. `fan${index}`.
struct ChannelRule {
    pattern: Regex,
    canonical: &'static str,
}

const RULE_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)^fan\s*(?:speed|duty)$", "fan"),
    (r"(?i)^pump\s*(?:speed|duty)$", "pump"),
    (r"(?i)^pump\s*fan\s*(?:speed|duty)$", "pump-fan"),
    (r"(?i)^fan\s*(?P<index>\d+)\s*(?:speed|duty)$", "fan${index}"),
    (r"(?i)^fan\s*(?:speed|duty)\s*(?P<index>\d+)$", "fan${index}"),
];

lazy_static! {
    /// Evaluated in order, first match wins. Add vendor variants to `RULE_PATTERNS`.
    static ref CHANNEL_RULES: Vec<ChannelRule> = RULE_PATTERNS
        .iter()
        .filter_map(|(pattern, canonical)| {
            Regex::new(pattern).ok().map(|pattern| ChannelRule { pattern, canonical: *canonical })
        })
        .collect();

    static ref DUTY_WORD: Option<Regex> = Regex::new(r"(?i)\bduty\b").ok();
    static ref DUTY_WITH_SPACING: Option<Regex> = Regex::new(r"(?i)\s*\bduty\b\s*").ok();
}

/// Canonical write channel for a raw key. Unmatched keys come back unchanged.
pub fn canonical_channel(key: &str) -> String {
    let trimmed = key.trim();
    for rule in CHANNEL_RULES.iter() {
        if let Some(caps) = rule.pattern.captures(trimmed) {
            let mut out = String::new();
            caps.expand(rule.canonical, &mut out);
            return out;
        }
    }
    key.to_string()
}

/// Key of the read-only speed channel that a duty channel drives
pub fn speed_key_from_duty_key(key: &str) -> String {
    match DUTY_WORD.as_ref() {
        Some(re) => re.replace_all(key, "speed").into_owned(),
        None => key.to_string(),
    }
}

/// Human-facing label for a channel key with the word "duty" removed
pub fn display_key(key: &str) -> String {
    match DUTY_WITH_SPACING.as_ref() {
        Some(re) => re.replace_all(key, " ").trim().to_string(),
        None => key.trim().to_string(),
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Stable identity of a device channel across snapshots
pub fn sensor_id(description: &str, key: &str) -> String {
    format!("{}/{}", strip_whitespace(description), strip_whitespace(key))
}

pub fn sensor_name(description: &str, key: &str) -> String {
    format!("{}: {}", description, display_key(key))
}
