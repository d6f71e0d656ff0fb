//! Scope expressions: textual filters selecting the methods a fragment
//! applies to.
//!
//! A filter is specified as
//! `[<returnType>] [<className>.]<methodName> [(<paramTypes>)]` and each
//! element (or a part of it) can be substituted with the `*` wildcard. The
//! individual elements mean:
//!
//! - **returnType** - fully qualified class name or primitive name of the
//!   return value; absent means any return type.
//! - **className** - fully qualified name of the declaring class. When the
//!   package part is omitted the filter matches the class in *any* package;
//!   the `[default]` token stands for the unnamed package.
//! - **methodName** - mandatory; use `*` to match any method.
//! - **paramTypes** - comma-separated parameter type list. The list may end
//!   with `..` to match any remaining parameters. Absent means any parameters.
//!
//! Examples: `my.pkg.TargetClass.main(java.lang.String[])`, `int *`,
//! `*(int, int, int)`, `[default].TargetClass.method`.

use crate::{
    method::MethodDesc,
    scope::wildcard::{wildcard_match, WILDCARD},
    Error, Result,
};

const PARAM_END: char = ')';
const PARAM_BEGIN: char = '(';
const PARAM_DELIM: char = ',';
const METHOD_DELIM: char = '.';
const PARAM_MATCH_REST: &str = "..";
const DEFAULT_PKG: &str = "[default]";

/// A parsed, immutable method filter.
///
/// Parsed once at configuration time and reused for the whole weaving run.
/// Construction fails on an empty filter (the method-name element is
/// mandatory) and on a parameter list carrying the `..` match-rest sentinel
/// anywhere but the last position - such filters never silently degrade to
/// "match everything".
#[derive(Debug, Clone)]
pub struct ScopeFilter {
    class_pattern: Option<String>,
    method_pattern: String,
    return_pattern: Option<String>,
    param_patterns: Option<Vec<String>>,
}

impl ScopeFilter {
    /// Parses a scope expression.
    ///
    /// Parsing proceeds from the end of the string: the trailing parenthesized
    /// parameter list is extracted first, then the return type is split off -
    /// but only when the remainder splits on whitespace into exactly two parts
    /// - and finally the last `.` separates the class name from the method
    /// name. A class token without a package separator that is not already a
    /// wildcard is prefixed with `*.` so that it matches the class in any
    /// package.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScopeParse`] for an empty method name, a malformed
    /// parameter list, a misplaced `..` sentinel, or an unparseable return
    /// type.
    pub fn parse(expression: &str) -> Result<Self> {
        let err = |message: &str| Error::ScopeParse {
            expression: expression.to_string(),
            message: message.to_string(),
        };

        let mut rest: &str = expression;

        // -- method parameters --
        let param_patterns = match rest.rfind(PARAM_BEGIN) {
            Some(begin) => {
                let params_str = rest[begin + 1..].trim();
                rest = &rest[..begin];

                if !params_str.ends_with(PARAM_END) {
                    return Err(err("should end with \")\""));
                }
                let inner = &params_str[..params_str.rfind(PARAM_END).unwrap_or(0)];

                let mut params = Vec::new();
                if !inner.trim().is_empty() {
                    for param in inner.split(PARAM_DELIM) {
                        let param = param.trim();
                        if param.is_empty() {
                            return Err(err("has bad parameter definition"));
                        }
                        params.push(param.to_string());
                    }
                }

                // The first occurrence of ".." must be the last parameter.
                if let Some(idx) = params.iter().position(|p| p == PARAM_MATCH_REST) {
                    if idx != params.len() - 1 {
                        return Err(err("should have \"..\" only as last parameter"));
                    }
                }

                Some(params)
            }
            None => None,
        };

        // -- method return type --
        //
        // A return type is recognized only when the remaining text splits on
        // single spaces, with trailing empty parts dropped, into exactly two
        // parts. This is the corrected detection: naively splitting at the
        // first whitespace misparses "java.lang.String main()" as a class
        // name instead of a return type.
        let mut return_expr = "";
        let mut parts: Vec<&str> = rest.split(' ').collect();
        while parts.last() == Some(&"") {
            parts.pop();
        }
        if parts.len() == 2 {
            let (head, tail) = rest.split_once(' ').unwrap_or((rest, ""));
            return_expr = head;
            rest = tail;
        }

        // -- method name --
        let (mut class_rest, method_raw) = match rest.rfind(METHOD_DELIM) {
            Some(idx) => (Some(&rest[..idx]), &rest[idx + 1..]),
            None => (None, rest),
        };

        let method_pattern = method_raw.trim();
        if method_pattern.is_empty() {
            return Err(err("should have defined method at least as \"*\""));
        }

        // -- full class name --
        let mut class_pattern = None;
        if let Some(class_str) = class_rest.take() {
            let class_str = class_str.trim();
            if !class_str.is_empty() {
                // Whatever precedes the last whitespace run is discarded; the
                // class token is the final whitespace-separated word.
                let token = class_str
                    .rsplit(char::is_whitespace)
                    .next()
                    .unwrap_or(class_str);

                // No package specified means any package.
                let token = if !token.contains(METHOD_DELIM) && !token.starts_with(WILDCARD) {
                    format!("{WILDCARD}{METHOD_DELIM}{token}")
                } else {
                    token.to_string()
                };

                class_pattern = Some(token);
            }
        }

        // -- method return type token --
        let mut return_pattern = None;
        let return_expr = return_expr.trim();
        if !return_expr.is_empty() {
            if return_expr.contains(char::is_whitespace) {
                return Err(err("cannot parse scope"));
            }
            return_pattern = Some(return_expr.to_string());
        }

        Ok(Self {
            class_pattern,
            method_pattern: method_pattern.to_string(),
            return_pattern,
            param_patterns,
        })
    }

    /// Matches a candidate method against this filter.
    ///
    /// `class_name` may use either `/` or `.` as package delimiter;
    /// `method_desc` is the candidate's raw method descriptor. A filter
    /// element that is absent matches everything on that axis. A candidate
    /// class without a package is given the `[default]` package before
    /// matching, so that `[default]`-scoped filters work symmetrically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `method_desc` cannot be parsed; this
    /// indicates corrupt input from the class file reader, never a filter
    /// problem.
    pub fn matches(&self, class_name: &str, method_name: &str, method_desc: &str) -> Result<bool> {
        // -- match class (with package) --
        let mut class_name = class_name.replace('/', ".");
        if !class_name.contains(METHOD_DELIM) {
            class_name = format!("{DEFAULT_PKG}{METHOD_DELIM}{class_name}");
        }

        if let Some(pattern) = &self.class_pattern {
            if !wildcard_match(&class_name, pattern) {
                return Ok(false);
            }
        }

        // -- match method name --
        if !wildcard_match(method_name, &self.method_pattern) {
            return Ok(false);
        }

        // -- match parameters --
        if self.param_patterns.is_some() || self.return_pattern.is_some() {
            let desc = MethodDesc::parse(method_desc)?;

            if let Some(patterns) = &self.param_patterns {
                let last_is_rest = patterns.last().is_some_and(|p| p == PARAM_MATCH_REST);

                // Without the match-rest sentinel the counts must be equal.
                if !last_is_rest && desc.params.len() != patterns.len() {
                    return Ok(false);
                }

                // With the sentinel, there must be enough leading parameters.
                if last_is_rest && desc.params.len() < patterns.len() - 1 {
                    return Ok(false);
                }

                for (param, pattern) in desc.params.iter().zip(patterns.iter()) {
                    if pattern == PARAM_MATCH_REST {
                        break;
                    }
                    if !wildcard_match(&param.class_name(), pattern) {
                        return Ok(false);
                    }
                }
            }

            // -- match return type --
            if let Some(pattern) = &self.return_pattern {
                if !wildcard_match(&desc.ret.class_name(), pattern) {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}

impl std::fmt::Display for ScopeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let params = self.param_patterns.as_ref().map(|p| p.join(", "));
        write!(
            f,
            "r={} c={} m={} p={}",
            self.return_pattern.as_deref().unwrap_or("<any>"),
            self.class_pattern.as_deref().unwrap_or("<any>"),
            self.method_pattern,
            params.map_or("<any>".to_string(), |p| format!("({p})")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(expr: &str) -> ScopeFilter {
        ScopeFilter::parse(expr).unwrap()
    }

    fn matches(f: &ScopeFilter, class: &str, method: &str, desc: &str) -> bool {
        f.matches(class, method, desc).unwrap()
    }

    // smoke tests

    #[test]
    fn test_simple() {
        let s = filter("my.pkg.TargetClass.main()");
        assert!(matches(&s, "my/pkg/TargetClass", "main", "()V"));
    }

    #[test]
    fn test_complete() {
        let s = filter("java.lang.String my.pkg.TargetClass.main(java.lang.String[])");
        assert!(matches(
            &s,
            "my/pkg/TargetClass",
            "main",
            "([Ljava/lang/String;)Ljava/lang/String;"
        ));
    }

    // method tests

    #[test]
    fn test_method_wildcard() {
        let s = filter("java.lang.String my.pkg.TargetClass.*main(java.lang.String[])");
        assert!(matches(
            &s,
            "my/pkg/TargetClass",
            "blablablamain",
            "([Ljava/lang/String;)Ljava/lang/String;"
        ));
    }

    #[test]
    fn test_method_all_wildcard() {
        let s = filter("my.pkg.TargetClass.*");
        assert!(matches(&s, "my/pkg/TargetClass", "clinit", "()V"));
        assert!(matches(&s, "my/pkg/TargetClass", "init", "()V"));
        assert!(matches(&s, "my/pkg/TargetClass", "method_init", "()V"));
    }

    #[test]
    fn test_method_init_wildcard() {
        let s = filter("my.pkg.TargetClass.*init");
        assert!(matches(&s, "my/pkg/TargetClass", "clinit", "()V"));
        assert!(matches(&s, "my/pkg/TargetClass", "init", "()V"));
        assert!(matches(&s, "my/pkg/TargetClass", "method_init", "()V"));
    }

    // return type tests

    #[test]
    fn test_return_all_wildcard() {
        let s = filter("* my.pkg.TargetClass.method");
        assert!(matches(&s, "my/pkg/TargetClass", "method", "()V"));
        assert!(matches(&s, "my/pkg/TargetClass", "method", "()I"));
        assert!(matches(
            &s,
            "my/pkg/TargetClass",
            "method",
            "()Ljava/lang/String;"
        ));
    }

    #[test]
    fn test_return_string_wildcard() {
        let s = filter("*.String my.pkg.TargetClass.method");
        assert!(matches(
            &s,
            "my/pkg/TargetClass",
            "method",
            "()Ljava/lang/String;"
        ));
        assert!(matches(
            &s,
            "my/pkg/TargetClass",
            "method",
            "()Lmy/package/String;"
        ));
    }

    #[test]
    fn test_return_suffix_wildcard() {
        let s = filter("*String my.pkg.TargetClass.method");
        assert!(matches(
            &s,
            "my/pkg/TargetClass",
            "method",
            "()Lmy/package/BigString;"
        ));
    }

    // class name tests

    #[test]
    fn test_missing_class_name() {
        // "java.lang.String main()" must parse as return type
        // java.lang.String, any class, method main - not as class
        // java.lang.String with method main.
        let s = filter("java.lang.String main()");
        assert!(matches(
            &s,
            "my/pkg/TargetClass",
            "main",
            "()Ljava/lang/String;"
        ));
    }

    #[test]
    fn test_missing_class_name_inner_wildcard() {
        let s = filter("java.*.String main()");
        assert!(matches(
            &s,
            "my/pkg/TargetClass",
            "main",
            "()Ljava/lang/String;"
        ));
    }

    #[test]
    fn test_class_all_packages() {
        let s = filter("TargetClass.method");
        assert!(matches(&s, "TargetClass", "method", "()V"));
        assert!(matches(&s, "my/pkg/TargetClass", "method", "()V"));
    }

    #[test]
    fn test_class_default_package() {
        let s = filter("[default].TargetClass.method");
        assert!(matches(&s, "TargetClass", "method", "()V"));
        assert!(!matches(&s, "my/pkg/TargetClass", "method", "()V"));
    }

    #[test]
    fn test_class_wildcard() {
        let s = filter("my.pkg.*TargetClass.method");
        assert!(matches(&s, "my/pkg/TargetClass", "method", "()V"));
        assert!(matches(&s, "my/pkg/pkg/TargetClass", "method", "()V"));
        assert!(matches(&s, "my/pkg/AnotherTargetClass", "method", "()V"));
    }

    // parameter tests

    #[test]
    fn test_parameter_match_any() {
        let s = filter("my.pkg.TargetClass.method(..)");
        assert!(matches(&s, "my/pkg/TargetClass", "method", "()V"));
        assert!(matches(&s, "my/pkg/TargetClass", "method", "(I)V"));
        assert!(matches(&s, "my/pkg/TargetClass", "method", "([I)V"));
        assert!(matches(
            &s,
            "my/pkg/TargetClass",
            "method",
            "([Ljava/lang/String;[I[I[I)V"
        ));
    }

    #[test]
    fn test_parameter_none() {
        let s = filter("my.pkg.TargetClass.method()");
        assert!(matches(&s, "my/pkg/TargetClass", "method", "()V"));
        assert!(!matches(&s, "my/pkg/TargetClass", "method", "(I)V"));
    }

    #[test]
    fn test_parameter_match_rest() {
        // (int, int, int, ..) matches three-or-more leading ints, never one.
        let s = filter("my.pkg.TargetClass.method(int, int, int, ..)");
        assert!(matches(&s, "my/pkg/TargetClass", "method", "(III)V"));
        assert!(matches(&s, "my/pkg/TargetClass", "method", "(IIII)V"));
        assert!(!matches(&s, "my/pkg/TargetClass", "method", "(I)V"));
    }

    // complete tests

    #[test]
    fn test_return_only_pattern() {
        let s = filter("int *");
        assert!(matches(&s, "my/pkg/TargetClass", "method", "()I"));
        assert!(matches(&s, "my/pkg/TargetClass", "method", "(I)I"));
        assert!(matches(&s, "TargetClass", "method", "()I"));
    }

    #[test]
    fn test_params_only_pattern() {
        let s = filter("*(int, int, int)");
        assert!(matches(&s, "TargetClass", "method", "(III)I"));
        assert!(matches(&s, "my/pkg/TargetClass", "method", "(III)V"));
        assert!(!matches(&s, "my/pkg/TargetClass", "method", "(II)I"));
        assert!(!matches(&s, "my/pkg/TargetClass", "method", "(IIII)I"));
        assert!(!matches(
            &s,
            "my/pkg/TargetClass",
            "method",
            "(Ljava/lang/String;)I"
        ));
    }

    // error tests

    #[test]
    fn test_cannot_create_empty_scope() {
        assert!(ScopeFilter::parse("").is_err());
    }

    #[test]
    fn test_match_rest_must_be_last() {
        assert!(ScopeFilter::parse("TargetClass.method(.., int)").is_err());
    }

    #[test]
    fn test_unterminated_parameter_list() {
        assert!(ScopeFilter::parse("TargetClass.method(int").is_err());
    }

    #[test]
    fn test_empty_parameter_entry() {
        assert!(ScopeFilter::parse("TargetClass.method(int,,int)").is_err());
    }
}
