//! Glob matching for watch registrations. `*` matches exactly one path
//! component; `**` matches any suffix of zero or more components and must
//! be the final component of the pattern.

fn components(s: &str) -> Vec<&str> {
    if s == "/" {
        Vec::new()
    } else {
        s.trim_start_matches('/').split('/').collect()
    }
}

pub fn glob_match(pattern: &str, path: &str) -> bool {
    match_comps(&components(pattern), &components(path))
}

fn match_comps(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) if rest.is_empty() => true,
        Some((&"*", rest)) => !path.is_empty() && match_comps(rest, &path[1..]),
        Some((head, rest)) => !path.is_empty() && path[0] == *head && match_comps(rest, &path[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_literal_matches_only_itself() {
        assert!(glob_match("/x", "/x"));
        assert!(!glob_match("/x", "/y"));
        assert!(!glob_match("/x", "/x/y"));
    }

    #[test]
    fn single_star_matches_one_component() {
        assert!(glob_match("/*", "/x"));
        assert!(!glob_match("/*", "/x/y"));
        assert!(!glob_match("/*", "/"));
    }

    #[test]
    fn double_star_matches_any_suffix() {
        assert!(glob_match("/**", "/"));
        assert!(glob_match("/**", "/x"));
        assert!(glob_match("/**", "/x/y/z"));
        assert!(glob_match("/x/**", "/x"));
        assert!(glob_match("/x/**", "/x/y/z"));
        assert!(!glob_match("/x/**", "/y"));
    }

    #[test]
    fn root_pattern_matches_only_root() {
        assert!(glob_match("/", "/"));
        assert!(!glob_match("/", "/x"));
    }
}
