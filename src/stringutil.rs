//! String helpers for generated names, env vars, and artifact text.
//!
//! Wiring definition names are dotted paths like `a.grpc.bind_addr`; most
//! artifact formats (directory names, env vars, shell functions, Go
//! identifiers) accept a narrower alphabet, so everything that lands in an
//! artifact goes through [`clean_name`] first.

/// Sanitize a definition name for use in filenames, identifiers, and
/// generated code.
///
/// Allowed characters are `[A-Za-z0-9_]`. Any run of other characters is
/// collapsed into a single underscore. Leading digits are stripped so the
/// result is a legal identifier in every target format. The function is
/// idempotent: `clean_name(clean_name(x)) == clean_name(x)`.
pub fn clean_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut gap = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            if gap {
                out.push('_');
            }
            gap = false;
            out.push(ch);
        } else {
            gap = true;
        }
    }
    let trimmed = out.trim_start_matches(|c: char| c.is_ascii_digit());
    trimmed.to_string()
}

/// Derive the environment variable key for a definition name.
///
/// The name is sanitized with [`clean_name`] and uppercased, e.g.
/// `a.grpc.bind_addr` becomes `A_GRPC_BIND_ADDR`.
pub fn env_var(name: &str) -> String {
    clean_name(name).to_uppercase()
}

/// Derive a DNS label from a definition name, for Kubernetes object and
/// port names.
///
/// Allowed characters are lowercase `[a-z0-9]` and `-`; any run of other
/// characters collapses into a single hyphen. The result never starts or
/// ends with a hyphen and is capped at 63 characters.
pub fn dns_label(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut gap = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if gap && !out.is_empty() {
                out.push('-');
            }
            gap = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            gap = true;
        }
    }
    out.truncate(63);
    out.trim_end_matches('-').to_string()
}

/// Capitalize the first character of `s`.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Prefix every line of `s` with `amount` spaces.
pub fn indent(s: &str, amount: usize) -> String {
    let prefix = " ".repeat(amount);
    s.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Re-indent a block of text to `amount` spaces.
///
/// Tabs count as four spaces. The smallest indentation over all non-blank
/// lines is stripped from each line and replaced with `amount` spaces;
/// whitespace-only lines become empty. Used when splicing user-contributed
/// shell fragments into generated scripts.
pub fn reindent(s: &str, amount: usize) -> String {
    let expanded: Vec<String> = s
        .lines()
        .map(|line| line.replace('\t', "    "))
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                line
            }
        })
        .collect();

    let min_indent = expanded
        .iter()
        .filter(|line| !line.is_empty())
        .map(|line| line.len() - line.trim_start_matches(' ').len())
        .min()
        .unwrap_or(0);

    let prefix = " ".repeat(amount);
    expanded
        .iter()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{prefix}{}", &line[min_indent..])
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replace a trailing `suffix` of `name` with `replacement`.
///
/// Address names conventionally end in `addr`; the paired bind and dial
/// config names are derived by rewriting that suffix (`a.grpc.addr` to
/// `a.grpc.bind_addr`). If `name` does not end with `suffix`, the
/// replacement is appended as a new dotted segment.
pub fn replace_suffix(name: &str, suffix: &str, replacement: &str) -> String {
    match name.strip_suffix(suffix) {
        Some(stem) => format!("{stem}{replacement}"),
        None => format!("{name}.{replacement}"),
    }
}
