//! Tcl-style word and list syntax.
//!
//! Lists are what the application-name property and `winfo interps` carry;
//! scripts are what the built-in command interpreter and `send` evaluate.
//! Scripts keep their substitutions (`$var`, `[cmd]`) as [`Part`]s for the
//! evaluator to resolve.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WordError {
    #[error("unmatched open brace in list")]
    ListBrace,
    #[error("unmatched open quote in list")]
    ListQuote,
    #[error("list element in {0} followed by \"{1}\" instead of space")]
    ListTrailing(&'static str, char),
    #[error("missing close-brace")]
    MissingBrace,
    #[error("missing \"")]
    MissingQuote,
    #[error("missing close-bracket")]
    MissingBracket,
    #[error("extra characters after close-{0}")]
    ExtraCharacters(&'static str),
}

/// Piece of a script word
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Literal(String),
    Var(String),
    Command(String),
}

/// One word of a command, to be concatenated after substitution
pub type Word = Vec<Part>;

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n' | '\x0b' | '\x0c')
}

/// Value of the backslash sequence starting after the backslash at `chars[i]`;
/// returns the replacement and how many characters it consumed
fn backslash(chars: &[char], i: usize) -> (String, usize) {
    let Some(&c) = chars.get(i) else {
        return ("\\".to_string(), 0);
    };
    let s = match c {
        'n' => "\n".to_string(),
        't' => "\t".to_string(),
        'r' => "\r".to_string(),
        'a' => "\x07".to_string(),
        'b' => "\x08".to_string(),
        'f' => "\x0c".to_string(),
        'v' => "\x0b".to_string(),
        '\n' => {
            let mut n = 1;
            while chars.get(i + n).is_some_and(|&c| c == ' ' || c == '\t') {
                n += 1;
            }
            return (" ".to_string(), n);
        }
        other => other.to_string(),
    };
    (s, 1)
}

/// Split a list into its elements
pub fn split_list(list: &str) -> Result<Vec<String>, WordError> {
    let chars: Vec<char> = list.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        while i < chars.len() && is_space(chars[i]) {
            i += 1;
        }
        if i >= chars.len() {
            return Ok(out);
        }
        let mut element = String::new();
        match chars[i] {
            '{' => {
                let mut depth = 1;
                i += 1;
                let start = i;
                while i < chars.len() {
                    match chars[i] {
                        '\\' => i += 1,
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                if depth != 0 || i >= chars.len() {
                    return Err(WordError::ListBrace);
                }
                element.extend(&chars[start..i]);
                i += 1;
                if let Some(&c) = chars.get(i).filter(|&&c| !is_space(c)) {
                    return Err(WordError::ListTrailing("braces", c));
                }
            }
            '"' => {
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(WordError::ListQuote),
                        Some('"') => break,
                        Some('\\') => {
                            let (s, n) = backslash(&chars, i + 1);
                            element.push_str(&s);
                            i += n;
                        }
                        Some(&c) => element.push(c),
                    }
                    i += 1;
                }
                i += 1;
                if let Some(&c) = chars.get(i).filter(|&&c| !is_space(c)) {
                    return Err(WordError::ListTrailing("quotes", c));
                }
            }
            _ => {
                while i < chars.len() && !is_space(chars[i]) {
                    if chars[i] == '\\' {
                        let (s, n) = backslash(&chars, i + 1);
                        element.push_str(&s);
                        i += n;
                    } else {
                        element.push(chars[i]);
                    }
                    i += 1;
                }
            }
        }
        out.push(element);
    }
}

/// Quote `word` so that [`split_list`] gives it back as one element
pub fn quote(word: &str) -> String {
    if word.is_empty() {
        return "{}".to_string();
    }
    let special = |c: char| is_space(c) || matches!(c, '{' | '}' | '"' | '[' | ']' | '$' | '\\' | ';');
    if !word.starts_with('#') && !word.chars().any(special) {
        return word.to_string();
    }
    let mut depth = 0i32;
    let mut balanced = true;
    for c in word.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    balanced = false;
                }
            }
            _ => {}
        }
    }
    if balanced && depth == 0 && !word.contains('\\') {
        return format!("{{{}}}", word);
    }
    let mut out = String::with_capacity(word.len() * 2);
    for c in word.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if special(c) || c == '#' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Build a list from its elements
pub fn join<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a script into commands, each a list of words
pub fn parse_script(script: &str) -> Result<Vec<Vec<Word>>, WordError> {
    let chars: Vec<char> = script.chars().collect();
    let mut parser = Parser { chars: &chars, i: 0 };
    parser.script()
}

struct Parser<'a> {
    chars: &'a [char],
    i: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.i).copied()
    }

    fn at_word_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(c) => is_space(c) || c == ';',
        }
    }

    fn script(&mut self) -> Result<Vec<Vec<Word>>, WordError> {
        let mut commands = Vec::new();
        let mut words: Vec<Word> = Vec::new();
        loop {
            match self.peek() {
                None => break,
                Some('\n' | ';') => {
                    self.i += 1;
                    if !words.is_empty() {
                        commands.push(std::mem::take(&mut words));
                    }
                }
                Some('\\') if self.chars.get(self.i + 1) == Some(&'\n') => self.i += 2,
                Some(c) if is_space(c) => self.i += 1,
                Some('#') if words.is_empty() => {
                    while let Some(c) = self.peek() {
                        self.i += 1;
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some(_) => words.push(self.word()?),
            }
        }
        if !words.is_empty() {
            commands.push(words);
        }
        Ok(commands)
    }

    fn word(&mut self) -> Result<Word, WordError> {
        match self.peek() {
            Some('{') => {
                let body = self.braced()?;
                if !self.at_word_end() {
                    return Err(WordError::ExtraCharacters("brace"));
                }
                Ok(vec![Part::Literal(body)])
            }
            Some('"') => {
                self.i += 1;
                let parts = self.substituted(|c| c == '"')?;
                if self.peek() != Some('"') {
                    return Err(WordError::MissingQuote);
                }
                self.i += 1;
                if !self.at_word_end() {
                    return Err(WordError::ExtraCharacters("quote"));
                }
                Ok(parts)
            }
            _ => self.substituted(|c| is_space(c) || c == ';'),
        }
    }

    /// Body of a braced word, cursor on the open brace
    fn braced(&mut self) -> Result<String, WordError> {
        let mut depth = 0;
        let start = self.i + 1;
        while let Some(c) = self.peek() {
            match c {
                '\\' => self.i += 1,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let body: String = self.chars[start..self.i].iter().collect();
                        self.i += 1;
                        return Ok(body.replace("\\\n", " "));
                    }
                }
                _ => {}
            }
            self.i += 1;
        }
        Err(WordError::MissingBrace)
    }

    fn substituted(&mut self, stop: impl Fn(char) -> bool) -> Result<Word, WordError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        while let Some(c) = self.peek() {
            if stop(c) {
                break;
            }
            match c {
                '\\' => {
                    let (s, n) = backslash(self.chars, self.i + 1);
                    literal.push_str(&s);
                    self.i += n + 1;
                }
                '$' => match self.variable()? {
                    Some(name) => {
                        if !literal.is_empty() {
                            parts.push(Part::Literal(std::mem::take(&mut literal)));
                        }
                        parts.push(Part::Var(name));
                    }
                    None => {
                        literal.push('$');
                        self.i += 1;
                    }
                },
                '[' => {
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Command(self.bracketed()?));
                }
                c => {
                    literal.push(c);
                    self.i += 1;
                }
            }
        }
        if !literal.is_empty() || parts.is_empty() {
            parts.push(Part::Literal(literal));
        }
        Ok(parts)
    }

    /// Variable name after `$`, or `None` when the dollar is literal
    fn variable(&mut self) -> Result<Option<String>, WordError> {
        let start = self.i + 1;
        if self.chars.get(start) == Some(&'{') {
            let Some(len) = self.chars[start + 1..].iter().position(|&c| c == '}') else {
                return Err(WordError::MissingBrace);
            };
            let name = self.chars[start + 1..start + 1 + len].iter().collect();
            self.i = start + len + 2;
            return Ok(Some(name));
        }
        let mut end = start;
        while self
            .chars
            .get(end)
            .is_some_and(|&c| c.is_alphanumeric() || c == '_' || c == ':')
        {
            end += 1;
        }
        if end == start {
            return Ok(None);
        }
        self.i = end;
        Ok(Some(self.chars[start..end].iter().collect()))
    }

    /// Script inside brackets, cursor on the open bracket
    fn bracketed(&mut self) -> Result<String, WordError> {
        let mut depth = 0;
        let mut braces = 0;
        let start = self.i + 1;
        while let Some(c) = self.peek() {
            match c {
                '\\' => self.i += 1,
                '{' => braces += 1,
                '}' if braces > 0 => braces -= 1,
                '[' if braces == 0 => depth += 1,
                ']' if braces == 0 => {
                    depth -= 1;
                    if depth == 0 {
                        let body = self.chars[start..self.i].iter().collect();
                        self.i += 1;
                        return Ok(body);
                    }
                }
                _ => {}
            }
            self.i += 1;
        }
        Err(WordError::MissingBracket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Word {
        vec![Part::Literal(s.to_string())]
    }

    #[test]
    fn test_split_list_forms() {
        assert_eq!(split_list("a b  c").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(split_list("{app #2} other").unwrap(), vec!["app #2", "other"]);
        assert_eq!(split_list("\"x y\" z\\ w").unwrap(), vec!["x y", "z w"]);
        assert_eq!(split_list("{a {b c}} {}").unwrap(), vec!["a {b c}", ""]);
        assert!(split_list("   ").unwrap().is_empty());
    }

    #[test]
    fn test_split_list_errors() {
        assert_eq!(split_list("{a b").unwrap_err(), WordError::ListBrace);
        assert_eq!(split_list("\"a b").unwrap_err(), WordError::ListQuote);
        assert_eq!(
            split_list("{a}b").unwrap_err().to_string(),
            "list element in braces followed by \"b\" instead of space"
        );
    }

    #[test]
    fn test_join_survives_split() {
        let names = ["app", "app #2", "", "{odd", "a\\b", "#hash", "x}y{"];
        assert_eq!(split_list(&join(names)).unwrap(), names);
        assert_eq!(join(["app", "app #2"]), "app {app #2}");
    }

    #[test]
    fn test_parse_script_commands_and_comments() {
        let cmds = parse_script("# note\nset a 1; set b {x y}\n\n").unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0], vec![lit("set"), lit("a"), lit("1")]);
        assert_eq!(cmds[1][2], lit("x y"));
    }

    #[test]
    fn test_parse_script_substitutions() {
        let cmds = parse_script("puts \"v=$a [winfo name .]\" ${b}c").unwrap();
        assert_eq!(
            cmds[0][1],
            vec![
                Part::Literal("v=".into()),
                Part::Var("a".into()),
                Part::Literal(" ".into()),
                Part::Command("winfo name .".into()),
            ]
        );
        assert_eq!(cmds[0][2], vec![Part::Var("b".into()), Part::Literal("c".into())]);
        let cmds = parse_script("cost 5$ {$a}").unwrap();
        assert_eq!(cmds[0][1], lit("5$"));
        assert_eq!(cmds[0][2], lit("$a"));
    }

    #[test]
    fn test_parse_script_errors() {
        assert_eq!(parse_script("set a {b").unwrap_err(), WordError::MissingBrace);
        assert_eq!(parse_script("set a \"b").unwrap_err(), WordError::MissingQuote);
        assert_eq!(parse_script("set a [b").unwrap_err(), WordError::MissingBracket);
        assert_eq!(
            parse_script("set a {b}c").unwrap_err().to_string(),
            "extra characters after close-brace"
        );
    }
}
