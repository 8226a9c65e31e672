//! `settings.txt` preprocessor.
//!
//! A tiny token-level preprocessor that edits the effective argv before
//! flag parsing. The file sits beside the executable and supports
//! `#ifdef <program>` / `#ifndef` / `#else` / `#endif` and
//! `#define <tokens...>` / `#undef <tokens...>`. Token matching is
//! case-insensitive with `*` wildcards at either end. A malformed file
//! leaves the argv untouched.

use std::path::PathBuf;

/// One token per element; the first is the `<program>` marker.
type TokenList = Vec<String>;

/// Case-insensitive match of one command-line token against one
/// pattern token, honoring leading/trailing `*` wildcards.
fn token_match(cmdline_token: &str, pattern: &str) -> bool {
    let any_start = pattern.starts_with('*') && !pattern.is_empty();
    let any_end = pattern.len() > 1 && pattern.ends_with('*')
        || (pattern == "*");

    let core_start = if any_start { 1 } else { 0 };
    let core_end = if any_end && pattern.len() > core_start {
        pattern.len() - 1
    } else {
        pattern.len()
    };
    let core = &pattern[core_start..core_end.max(core_start)];

    let c = cmdline_token.to_ascii_lowercase();
    let p = core.to_ascii_lowercase();

    match (any_start, any_end) {
        (false, false) => c == p,
        (true, false) => c.ends_with(&p),
        (false, true) => c.starts_with(&p),
        (true, true) => c.contains(&p),
    }
}

/// Finds the first position in `cmdline` where `pattern` matches as a
/// consecutive token subsequence.
fn find_tokens(cmdline: &[String], pattern: &[String]) -> Option<usize> {
    if pattern.is_empty() || pattern.len() > cmdline.len() {
        return None;
    }

    (0..=cmdline.len() - pattern.len()).find(|&start| {
        pattern
            .iter()
            .enumerate()
            .all(|(k, p)| token_match(&cmdline[start + k], p))
    })
}

fn delete_tokens(cmdline: &mut TokenList, pattern: &[String]) {
    if pattern.is_empty() {
        return;
    }
    while let Some(at) = find_tokens(cmdline, pattern) {
        cmdline.drain(at..at + pattern.len());
    }
}

/// Splits the settings text into tokens: whitespace separated, quotes
/// group, `//` comments run to end of line.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote = false;
    let mut comment = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            quote = false;
            comment = false;
        }
        if comment {
            continue;
        }
        if c == '"' {
            quote = !quote;
            continue;
        }
        if !quote && c == '/' && chars.peek() == Some(&'/') {
            comment = true;
            continue;
        }
        if !quote && c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

struct Execute {
    stack: i32,
    skip: bool,
    skip_stack: i32,
}

fn apply_directive(e: &mut Execute, cmdline: &mut TokenList, words: &[String]) {
    let Some(directive) = words.first() else {
        return;
    };
    let args = &words[1..];

    match directive.to_ascii_lowercase().as_str() {
        "#ifdef" | "#ifndef" => {
            e.stack += 1;
            if !e.skip {
                let found = find_tokens(cmdline, args).is_some();
                let wanted = directive.eq_ignore_ascii_case("#ifdef");
                if found != wanted {
                    e.skip_stack = e.stack;
                    e.skip = true;
                }
            }
        }
        "#else" => {
            if e.skip {
                if e.stack == e.skip_stack {
                    e.skip = false;
                }
            } else {
                e.skip_stack = e.stack;
                e.skip = true;
            }
        }
        "#endif" => {
            if e.skip && e.stack == e.skip_stack {
                e.skip = false;
            }
            e.stack -= 1;
        }
        "#define" if !e.skip => {
            cmdline.extend(args.iter().cloned());
        }
        "#undef" if !e.skip => {
            delete_tokens(cmdline, args);
        }
        _ => {}
    }
}

/// Applies a settings text to the argv. `program` is the stage name
/// tested by `#ifdef` blocks (matched as `<program>`).
pub fn apply_settings_text(program: &str, args: Vec<String>, text: &str) -> Vec<String> {
    let mut cmdline: TokenList = Vec::with_capacity(args.len() + 1);
    cmdline.push(format!("<{}>", program));
    cmdline.extend(args);

    let tokens = tokenize(text);

    let mut e = Execute {
        stack: 0,
        skip: false,
        skip_stack: 0,
    };

    // group the stream into [#directive arg...] runs
    let mut i = 0;
    while i < tokens.len() {
        if !tokens[i].starts_with('#') {
            i += 1;
            continue;
        }
        let start = i;
        i += 1;
        while i < tokens.len() && !tokens[i].starts_with('#') {
            i += 1;
        }
        apply_directive(&mut e, &mut cmdline, &tokens[start..i]);
    }

    // the <program> marker is not a real argument
    cmdline.remove(0);
    cmdline
}

/// Reads `settings.txt` beside the current executable and rewrites the
/// argv with it. Missing or unreadable files change nothing.
pub fn apply_settings_file(program: &str, args: Vec<String>) -> Vec<String> {
    let Some(path) = settings_path() else {
        return args;
    };
    let Ok(text) = std::fs::read_to_string(path) else {
        return args;
    };

    apply_settings_text(program, args, &text)
}

fn settings_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join("settings.txt"))
}

#[cfg(test)]
mod test {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wildcard_token_match() {
        assert!(token_match("-threads", "-THREADS"));
        assert!(token_match("-threads", "-thr*"));
        assert!(token_match("map.bsp", "*.bsp"));
        assert!(token_match("anything", "*"));
        assert!(!token_match("-threads", "-chop"));
        assert!(!token_match("map.map", "*.bsp"));
    }

    #[test]
    fn define_appends_tokens() {
        let out = apply_settings_text("hlrad", args(&["in.map"]), "#define -bounce 16");
        assert_eq!(out, args(&["in.map", "-bounce", "16"]));
    }

    #[test]
    fn undef_removes_all_occurrences() {
        let out = apply_settings_text(
            "hlrad",
            args(&["-extra", "in.map", "-extra"]),
            "#undef -extra",
        );
        assert_eq!(out, args(&["in.map"]));
    }

    #[test]
    fn ifdef_selects_program() {
        let text = "\
#ifdef <hlrad>
#define -bounce 2
#else
#define -fast
#endif
";
        let rad = apply_settings_text("hlrad", args(&["m.map"]), text);
        assert_eq!(rad, args(&["m.map", "-bounce", "2"]));

        let vis = apply_settings_text("hlvis", args(&["m.map"]), text);
        assert_eq!(vis, args(&["m.map", "-fast"]));
    }

    #[test]
    fn nested_ifdef_skip() {
        let text = "\
#ifdef <hlcsg>
#ifdef -nonexistent
#define -never
#endif
#define -always
#endif
";
        let out = apply_settings_text("hlcsg", args(&[]), text);
        assert_eq!(out, args(&["-always"]));
    }

    #[test]
    fn comments_and_quotes() {
        let text = "// header comment\n#define \"-dev\" \"2\" // trailing\n";
        let out = apply_settings_text("hlbsp", args(&[]), text);
        assert_eq!(out, args(&["-dev", "2"]));
    }

    #[test]
    fn conditional_on_existing_flag() {
        let text = "#ifdef -extra\n#define -blur 1.5\n#endif\n";
        let with = apply_settings_text("hlrad", args(&["-extra"]), text);
        assert_eq!(with, args(&["-extra", "-blur", "1.5"]));

        let without = apply_settings_text("hlrad", args(&[]), text);
        assert_eq!(without, args(&[]));
    }
}
