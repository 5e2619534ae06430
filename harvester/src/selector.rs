/// How an attribute selector compares the attribute value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttrMatch {
    /// `[attr]`
    Present,
    /// `[attr='v']`
    Equals(String),
    /// `[attr*='v']`
    Contains(String),
    /// `[attr^='v']`
    StartsWith(String),
    /// `[attr$='v']`
    EndsWith(String),
    /// `[attr~='v']`, whitespace-separated word match (also used for `.class`)
    Word(String),
}

impl AttrMatch {
    /// Evaluate the matcher against an attribute value (`None` = attribute missing)
    pub fn matches(&self, value: Option<&str>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            AttrMatch::Present => true,
            AttrMatch::Equals(v) => value == v,
            AttrMatch::Contains(v) => value.contains(v.as_str()),
            AttrMatch::StartsWith(v) => value.starts_with(v.as_str()),
            AttrMatch::EndsWith(v) => value.ends_with(v.as_str()),
            AttrMatch::Word(v) => value.split_whitespace().any(|w| w == v),
        }
    }

    fn operator(&self) -> &'static str {
        match self {
            AttrMatch::Present => "",
            AttrMatch::Equals(_) => "=",
            AttrMatch::Contains(_) => "*=",
            AttrMatch::StartsWith(_) => "^=",
            AttrMatch::EndsWith(_) => "$=",
            AttrMatch::Word(_) => "~=",
        }
    }

    fn value(&self) -> Option<&str> {
        match self {
            AttrMatch::Present => None,
            AttrMatch::Equals(v)
            | AttrMatch::Contains(v)
            | AttrMatch::StartsWith(v)
            | AttrMatch::EndsWith(v)
            | AttrMatch::Word(v) => Some(v),
        }
    }
}

/// Represents ways to locate an element on the page
///
/// Selectors are plain data: fallback chains are lists of them, and the engine
/// decides how to evaluate each one (CSS in the browser, tree matching in tests).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Universal selector `*`
    Any,
    /// Select by tag name
    Tag(String),
    /// Select by attribute presence or value
    Attribute { name: String, matcher: AttrMatch },
    /// All parts must match the same element, e.g. `a[role='link']`
    Compound(Vec<Selector>),
    /// Each part must match an ancestor of the next, e.g. `div[role='grid'] a`
    Descendant(Vec<Selector>),
    /// Any of the alternatives, e.g. `img, video`
    Or(Vec<Selector>),
    /// Select using an XPath expression
    XPath(String),
    /// Represents an invalid selector string, with a reason.
    Invalid(String),
}

impl Selector {
    pub fn tag(tag: impl Into<String>) -> Self {
        Selector::Tag(tag.into().to_lowercase())
    }

    pub fn attr(name: impl Into<String>, matcher: AttrMatch) -> Self {
        Selector::Attribute {
            name: name.into(),
            matcher,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Selector::Invalid(_) => false,
            Selector::Compound(parts) | Selector::Descendant(parts) | Selector::Or(parts) => {
                parts.iter().all(Selector::is_valid)
            }
            _ => true,
        }
    }

    /// Render as a CSS selector string. XPath and invalid selectors have no CSS form.
    pub fn to_css(&self) -> Option<String> {
        match self {
            Selector::Any => Some("*".to_string()),
            Selector::Tag(tag) => Some(tag.clone()),
            Selector::Attribute { name, matcher } => Some(match matcher.value() {
                None => format!("[{name}]"),
                Some(value) => format!(
                    "[{name}{}='{}']",
                    matcher.operator(),
                    value.replace('\\', "\\\\").replace('\'', "\\'")
                ),
            }),
            Selector::Compound(parts) => parts
                .iter()
                .map(Selector::to_nested_css)
                .collect::<Option<Vec<_>>>()
                .map(|p| p.concat()),
            Selector::Descendant(parts) => parts
                .iter()
                .map(Selector::to_nested_css)
                .collect::<Option<Vec<_>>>()
                .map(|p| p.join(" ")),
            Selector::Or(parts) => parts
                .iter()
                .map(Selector::to_css)
                .collect::<Option<Vec<_>>>()
                .map(|p| p.join(", ")),
            Selector::XPath(_) | Selector::Invalid(_) => None,
        }
    }
}

impl Selector {
    // Alternatives inside a compound or descendant step need `:is()` to keep their grouping
    fn to_nested_css(&self) -> Option<String> {
        match self {
            Selector::Or(_) => self.to_css().map(|css| format!(":is({css})")),
            other => other.to_css(),
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::XPath(path) => write!(f, "xpath:{path}"),
            Selector::Invalid(reason) => write!(f, "invalid({reason})"),
            other => match other.to_css() {
                Some(css) => f.write_str(&css),
                None => write!(f, "{other:?}"),
            },
        }
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        Selector::from(s.as_str())
    }
}

impl From<&String> for Selector {
    fn from(s: &String) -> Self {
        Selector::from(s.as_str())
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return Selector::Invalid("Empty selector".to_string());
        }

        if let Some(path) = s.strip_prefix("xpath:") {
            return Selector::XPath(path.trim().to_string());
        }
        if s.starts_with('/') || s.starts_with("(/") {
            return Selector::XPath(s.to_string());
        }
        let s = s.strip_prefix("css:").map(str::trim).unwrap_or(s);

        let alternatives = match split_top_level(s, |c| c == ',') {
            Ok(parts) => parts,
            Err(reason) => return Selector::Invalid(reason),
        };
        if alternatives.len() > 1 {
            let mut parsed = Vec::with_capacity(alternatives.len());
            for alt in alternatives {
                let sel = parse_descendant(alt);
                if let Selector::Invalid(_) = sel {
                    return sel;
                }
                parsed.push(sel);
            }
            return Selector::Or(parsed);
        }

        parse_descendant(s)
    }
}

/// Split on `is_sep` outside of brackets and quotes, dropping empty pieces
fn split_top_level(s: &str, is_sep: impl Fn(char) -> bool) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0usize;

    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '[' => depth += 1,
                ']' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| format!("Unbalanced ']' in selector \"{s}\""))?;
                }
                _ if depth == 0 && is_sep(c) => {
                    let piece = s[start..i].trim();
                    if !piece.is_empty() {
                        parts.push(piece);
                    }
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }

    if quote.is_some() {
        return Err(format!("Unterminated quote in selector \"{s}\""));
    }
    if depth != 0 {
        return Err(format!("Unbalanced '[' in selector \"{s}\""));
    }
    let piece = s[start..].trim();
    if !piece.is_empty() {
        parts.push(piece);
    }
    Ok(parts)
}

fn parse_descendant(s: &str) -> Selector {
    let steps = match split_top_level(s, char::is_whitespace) {
        Ok(steps) => steps,
        Err(reason) => return Selector::Invalid(reason),
    };

    let mut parsed = Vec::with_capacity(steps.len());
    for step in steps {
        let sel = parse_compound(step);
        if let Selector::Invalid(_) = sel {
            return sel;
        }
        parsed.push(sel);
    }

    match parsed.len() {
        0 => Selector::Invalid(format!("Empty selector \"{s}\"")),
        1 => parsed.remove(0),
        _ => Selector::Descendant(parsed),
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && is_ident_char(chars[*pos]) {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

fn parse_compound(s: &str) -> Selector {
    let chars: Vec<char> = s.chars().collect();
    let mut pos = 0usize;
    let mut parts = Vec::new();

    if chars.first() == Some(&'*') {
        parts.push(Selector::Any);
        pos = 1;
    } else if chars.first().is_some_and(|c| is_ident_char(*c)) {
        parts.push(Selector::tag(read_ident(&chars, &mut pos)));
    }

    while pos < chars.len() {
        match chars[pos] {
            '[' => {
                let Some(close) = find_closing_bracket(&chars, pos) else {
                    return Selector::Invalid(format!("Unbalanced '[' in selector \"{s}\""));
                };
                let body: String = chars[pos + 1..close].iter().collect();
                match parse_attribute(&body) {
                    Ok(sel) => parts.push(sel),
                    Err(reason) => return Selector::Invalid(format!("{reason} in \"{s}\"")),
                }
                pos = close + 1;
            }
            '#' | '.' => {
                let marker = chars[pos];
                pos += 1;
                let ident = read_ident(&chars, &mut pos);
                if ident.is_empty() {
                    return Selector::Invalid(format!("Missing name after '{marker}' in \"{s}\""));
                }
                parts.push(if marker == '#' {
                    Selector::attr("id", AttrMatch::Equals(ident))
                } else {
                    Selector::attr("class", AttrMatch::Word(ident))
                });
            }
            c => {
                return Selector::Invalid(format!(
                    "Unsupported selector syntax '{c}' in \"{s}\". Supported: tag, *, #id, .class, [attr], [attr='v'], [attr*='v'], [attr^='v'], [attr$='v'], [attr~='v'], descendant and comma"
                ))
            }
        }
    }

    match parts.len() {
        0 => Selector::Invalid(format!("Empty compound selector \"{s}\"")),
        1 => parts.remove(0),
        _ => Selector::Compound(parts),
    }
}

fn find_closing_bracket(chars: &[char], open: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, &c) in chars.iter().enumerate().skip(open + 1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == ']' => return Some(i),
            None => {}
        }
    }
    None
}

fn parse_attribute(body: &str) -> Result<Selector, String> {
    let chars: Vec<char> = body.trim().chars().collect();
    let mut pos = 0usize;
    let name = read_ident(&chars, &mut pos);
    if name.is_empty() {
        return Err("Missing attribute name".to_string());
    }
    let rest: String = chars[pos..].iter().collect();
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(Selector::attr(name, AttrMatch::Present));
    }

    let (op, raw_value) = ["*=", "^=", "$=", "~=", "="]
        .iter()
        .find_map(|op| rest.strip_prefix(op).map(|v| (*op, v.trim())))
        .ok_or_else(|| format!("Unsupported attribute operator in '[{body}]'"))?;

    let value = unquote(raw_value)
        .ok_or_else(|| format!("Attribute flags are not supported in '[{body}]'"))?;
    let matcher = match op {
        "*=" => AttrMatch::Contains(value),
        "^=" => AttrMatch::StartsWith(value),
        "$=" => AttrMatch::EndsWith(value),
        "~=" => AttrMatch::Word(value),
        _ => AttrMatch::Equals(value),
    };
    Ok(Selector::attr(name, matcher))
}

fn unquote(raw: &str) -> Option<String> {
    let mut chars = raw.chars();
    match chars.next() {
        Some(q @ ('\'' | '"')) => {
            let inner = &raw[1..];
            let end = inner.rfind(q)?;
            if !inner[end + 1..].trim().is_empty() {
                return None;
            }
            Some(inner[..end].replace(&format!("\\{q}"), &q.to_string()))
        }
        Some(_) if !raw.contains(char::is_whitespace) => Some(raw.to_string()),
        _ => None,
    }
}
