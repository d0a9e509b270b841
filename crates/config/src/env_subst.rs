/// Replace `${VAR}` and `${VAR:-fallback}` placeholders in raw config text.
///
/// Unset variables without a fallback are left as written so validation can
/// point at them.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// [`substitute_env`] with an injectable lookup, so tests never touch the
/// process environment.
pub(crate) fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: keep the remainder verbatim.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) if !value.is_empty() || fallback.is_none() => {
                out.push_str(&value)
            },
            (false, _, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(body);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Placeholders still present after substitution, e.g. `["BOT_TOKEN"]`.
pub fn unresolved_placeholders(input: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let name = after[..end].split(":-").next().unwrap_or_default();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        rest = &after[end + 1..];
    }
    names
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HUNTER_CHAT" => Some("-100123".into()),
            "HUNTER_EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[rstest]
    #[case("chat_id = \"${HUNTER_CHAT}\"", "chat_id = \"-100123\"")]
    #[case("${HUNTER_MISSING}", "${HUNTER_MISSING}")]
    #[case("${HUNTER_MISSING:-fallback}", "fallback")]
    #[case("${HUNTER_CHAT:-fallback}", "-100123")]
    #[case("${HUNTER_EMPTY:-fallback}", "fallback")]
    #[case("${HUNTER_EMPTY}", "")]
    #[case("a ${HUNTER_CHAT} b ${HUNTER_CHAT}", "a -100123 b -100123")]
    #[case("cost: $5 ${", "cost: $5 ${")]
    #[case("${}", "${}")]
    #[case("plain text", "plain text")]
    fn substitution(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(substitute_env_with(input, lookup), expected);
    }

    #[test]
    fn lists_unresolved_names_once() {
        assert_eq!(
            unresolved_placeholders("${A} ${B:-x} ${A} ${"),
            vec!["A".to_string(), "B".to_string()]
        );
    }
}
