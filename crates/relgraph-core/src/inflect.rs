//! English inflections used to derive default table, key and join-table
//! names from model names.
//!
//! Rules are regex tables compiled once; the first matching rule wins.
//! Examples:
//! - `Album` -> table `albums`, foreign key `album_id`
//! - `TeamMember` -> `team_members`
//! - `Person` -> `people`

use regex::Regex;
use std::sync::OnceLock;

type Rules = Vec<(Regex, &'static str)>;

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("foot", "feet"),
    ("tooth", "teeth"),
    ("goose", "geese"),
    ("mouse", "mice"),
    ("datum", "data"),
];

const UNCOUNTABLE: &[&str] = &["equipment", "information", "rice", "money", "series", "sheep", "fish"];

const PLURAL_RULES: &[(&str, &str)] = &[
    ("(?i)(matr|vert|ind)(?:ix|ex)$", "${1}ices"),
    ("(?i)(analy|cri|ax)sis$", "${1}ses"),
    ("(?i)(quiz)$", "${1}zes"),
    ("(?i)([^aeiouy]|qu)y$", "${1}ies"),
    ("(?i)(?:([^f])fe|([lr])f)$", "${1}${2}ves"),
    ("(?i)(x|ch|ss|sh)$", "${1}es"),
    ("(?i)(bu|statu|alia)s$", "${1}ses"),
    ("(?i)(octop|vir)us$", "${1}i"),
    ("(?i)s$", "s"),
    ("$", "s"),
];

const SINGULAR_RULES: &[(&str, &str)] = &[
    ("(?i)(matr)ices$", "${1}ix"),
    ("(?i)(vert|ind)ices$", "${1}ex"),
    ("(?i)(analy|cri|ax)ses$", "${1}sis"),
    ("(?i)(quiz)zes$", "${1}"),
    ("(?i)(octop|vir)i$", "${1}us"),
    ("(?i)(bu|statu|alia)ses$", "${1}s"),
    ("(?i)([^aeiouy]|qu)ies$", "${1}y"),
    ("(?i)([lr])ves$", "${1}f"),
    ("(?i)([^f])ves$", "${1}fe"),
    ("(?i)(x|ch|ss|sh)es$", "${1}"),
    ("(?i)ss$", "ss"),
    ("(?i)s$", ""),
];

fn compile(table: &[(&str, &'static str)]) -> Rules {
    table
        .iter()
        .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
            Ok(re) => Some((re, *replacement)),
            Err(err) => {
                tracing::warn!(pattern = %pattern, error = %err, "skipping inflection rule");
                None
            }
        })
        .collect()
}

fn plural_rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| compile(PLURAL_RULES))
}

fn singular_rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| compile(SINGULAR_RULES))
}

fn apply(word: &str, rules: &Rules) -> String {
    for (re, replacement) in rules {
        if re.is_match(word) {
            return re.replace(word, *replacement).into_owned();
        }
    }
    word.to_string()
}

// Splits off the last underscore-separated word so irregulars and
// uncountables also apply to `team_person` style names.
fn split_last(word: &str) -> (&str, &str) {
    match word.rfind('_') {
        Some(i) => (&word[..=i], &word[i + 1..]),
        None => ("", word),
    }
}

/// Plural form of a lower-case word.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let (head, last) = split_last(word);
    if UNCOUNTABLE.contains(&last) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(s, _)| *s == last) {
        return format!("{}{}", head, plural);
    }
    if IRREGULAR.iter().any(|(_, p)| *p == last) {
        return word.to_string();
    }
    apply(word, plural_rules())
}

/// Singular form of a lower-case word.
pub fn singularize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let (head, last) = split_last(word);
    if UNCOUNTABLE.contains(&last) {
        return word.to_string();
    }
    if let Some((singular, _)) = IRREGULAR.iter().find(|(_, p)| *p == last) {
        return format!("{}{}", head, singular);
    }
    if IRREGULAR.iter().any(|(s, _)| *s == last) {
        return word.to_string();
    }
    apply(word, singular_rules())
}

/// Convert PascalCase to snake_case.
///
/// - `Album` -> `album`
/// - `TeamMember` -> `team_member`
/// - `HTTPServer` -> `http_server`
pub fn underscore(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                let should_underscore = prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next.is_some_and(|n| n.is_lowercase()));
                if should_underscore {
                    result.push('_');
                }
            }
            result.extend(c.to_lowercase());
        } else if c == ':' || c == '-' {
            if !result.ends_with('_') {
                result.push('_');
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// Convert snake_case to PascalCase.
pub fn camelize(s: &str) -> String {
    s.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Default table name for a model: `TeamMember` -> `team_members`.
pub fn tableize(model: &str) -> String {
    pluralize(&underscore(model))
}

/// Default foreign key column naming a model: `Album` -> `album_id`.
pub fn foreign_key(model: &str) -> String {
    format!("{}_id", underscore(model))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("album"), "albums");
        assert_eq!(pluralize("track"), "tracks");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("bus"), "buses");
        assert_eq!(pluralize("wife"), "wives");
        assert_eq!(pluralize("person"), "people");
        assert_eq!(pluralize("team_person"), "team_people");
        assert_eq!(pluralize("sheep"), "sheep");
        assert_eq!(pluralize("tags"), "tags");
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("albums"), "album");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("people"), "person");
        assert_eq!(singularize("statuses"), "status");
        assert_eq!(singularize("address"), "address");
        assert_eq!(singularize("matrices"), "matrix");
    }

    #[test]
    fn test_underscore_and_camelize() {
        assert_eq!(underscore("Album"), "album");
        assert_eq!(underscore("TeamMember"), "team_member");
        assert_eq!(underscore("HTTPServer"), "http_server");
        assert_eq!(camelize("team_member"), "TeamMember");
        assert_eq!(camelize("album"), "Album");
    }

    #[test]
    fn test_tableize_and_foreign_key() {
        assert_eq!(tableize("Album"), "albums");
        assert_eq!(tableize("Category"), "categories");
        assert_eq!(foreign_key("Album"), "album_id");
        assert_eq!(foreign_key("TeamMember"), "team_member_id");
    }
}
