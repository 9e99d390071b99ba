//! Translates the item search filter language into a parameterized SQL
//! predicate.
//!
//! ```text
//! name eq 'report.pdf' and (size gt '1024' or startswith(extension,'pd'))
//! properties.tag eq 'invoice'
//! ```
//!
//! Comparison operators are `eq ne gt ge lt le`; `startswith`, `contains` and
//! `endswith` may be written infix (`name contains 'x'`) or as calls
//! (`contains(name,'x')`). `and` binds tighter than `or`. Every literal ends up
//! in [`Filter::params`]; the clause only ever contains whitelisted column
//! names, operators and `?` placeholders.

use crate::errors::{StoreError, StoreResult};

/// Predicate clause with positional `?` placeholders and their values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub clause: String,
    pub params: Vec<String>,
}

impl Filter {
    /// A filter matching every row.
    pub fn all() -> Self {
        Self {
            clause: "1=1".into(),
            params: Vec::new(),
        }
    }
}

const PROPERTY_PREFIX: &str = "properties.";

/// Searchable columns, keyed by the name used in filters.
const COLUMNS: [(&str, &str); 9] = [
    ("name", "name"),
    ("type", "kind"),
    ("kind", "kind"),
    ("size", "size"),
    ("sha256", "sha256"),
    ("sha512", "sha512"),
    ("extension", "extension"),
    ("created_at", "created_at"),
    ("updated_at", "updated_at"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    StartsWith,
    Contains,
    EndsWith,
}

impl Op {
    fn parse(word: &str) -> Option<Self> {
        Some(match word.to_ascii_lowercase().as_str() {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "gt" => Self::Gt,
            "ge" => Self::Ge,
            "lt" => Self::Lt,
            "le" => Self::Le,
            "startswith" => Self::StartsWith,
            "contains" => Self::Contains,
            "endswith" => Self::EndsWith,
            _ => return None,
        })
    }

    fn is_pattern(self) -> bool {
        matches!(self, Self::StartsWith | Self::Contains | Self::EndsWith)
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::StartsWith | Self::Contains | Self::EndsWith => "LIKE",
        }
    }

    /// LIKE pattern for a literal, with wildcards in the literal escaped.
    fn pattern(self, value: &str) -> String {
        let escaped = value
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        match self {
            Self::StartsWith => format!("{}%", escaped),
            Self::EndsWith => format!("%{}", escaped),
            _ => format!("%{}%", escaped),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Field {
    Column(&'static str),
    Property(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare { field: Field, op: Op, value: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Literal(String),
    Open,
    Close,
    Comma,
}

/// Translate a filter expression. An empty filter matches everything.
pub fn translate(filter: &str) -> StoreResult<Filter> {
    let tokens = tokenize(filter)?;
    if tokens.is_empty() {
        return Ok(Filter::all());
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(StoreError::InvalidFilter(format!(
            "unexpected {:?} after expression",
            token
        )));
    }

    let mut out = Filter {
        clause: String::new(),
        params: Vec::new(),
    };
    render(&expr, &mut out);
    Ok(out)
}

/// Validate an `$orderby` value (`field [asc|desc], ...`) into an ORDER BY list.
pub fn order_clause(orderby: &str) -> StoreResult<String> {
    let orderby = orderby.trim();
    if orderby.is_empty() {
        return Ok("created_at ASC".into());
    }

    let mut parts = Vec::new();
    for term in orderby.split(',') {
        let mut words = term.split_whitespace();
        let field = words
            .next()
            .ok_or_else(|| StoreError::InvalidFilter("empty order term".into()))?;
        let column = column(field)
            .ok_or_else(|| StoreError::InvalidFilter(format!("cannot order by `{}`", field)))?;
        let direction = match words.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => "ASC",
            Some("desc") => "DESC",
            Some(other) => {
                return Err(StoreError::InvalidFilter(format!(
                    "unknown order direction `{}`",
                    other
                )));
            }
        };
        if words.next().is_some() {
            return Err(StoreError::InvalidFilter(format!("malformed order term `{}`", term)));
        }
        parts.push(format!("{} {}", column, direction));
    }
    Ok(parts.join(", "))
}

fn column(name: &str) -> Option<&'static str> {
    COLUMNS
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map(|(_, column)| *column)
}

fn field(name: &str) -> StoreResult<Field> {
    if let Some(key) = name.strip_prefix(PROPERTY_PREFIX) {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidFilter(format!("invalid property key `{}`", key)));
        }
        return Ok(Field::Property(key.to_string()));
    }
    column(name)
        .map(Field::Column)
        .ok_or_else(|| StoreError::InvalidFilter(format!("unknown field `{}`", name)))
}

fn tokenize(input: &str) -> StoreResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '\'' | '"' => {
                chars.next();
                let mut literal = String::new();
                let mut closed = false;
                for (_, ch) in chars.by_ref() {
                    if ch == c {
                        closed = true;
                        break;
                    }
                    literal.push(ch);
                }
                if !closed {
                    return Err(StoreError::InvalidFilter(format!(
                        "unterminated literal starting at {}",
                        start
                    )));
                }
                tokens.push(Token::Literal(literal));
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' => {
                let mut word = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '-' {
                        word.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            other => {
                return Err(StoreError::InvalidFilter(format!(
                    "unexpected character `{}` at {}",
                    other, start
                )));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> StoreResult<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| StoreError::InvalidFilter("unexpected end of filter".into()))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: Token) -> StoreResult<()> {
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(StoreError::InvalidFilter(format!(
                "expected {:?}, found {:?}",
                expected, token
            )))
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn expr(&mut self) -> StoreResult<Expr> {
        let mut left = self.and_expr()?;
        while self.at_keyword("or") {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> StoreResult<Expr> {
        let mut left = self.primary()?;
        while self.at_keyword("and") {
            self.pos += 1;
            let right = self.primary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn primary(&mut self) -> StoreResult<Expr> {
        match self.next()? {
            Token::Open => {
                let inner = self.expr()?;
                self.expect(Token::Close)?;
                Ok(inner)
            }
            Token::Word(word) => {
                if matches!(self.peek(), Some(Token::Open)) {
                    return self.call(&word);
                }
                let field = field(&word)?;
                let op = match self.next()? {
                    Token::Word(op) => Op::parse(&op).ok_or_else(|| {
                        StoreError::InvalidFilter(format!("unknown operator `{}`", op))
                    })?,
                    other => {
                        return Err(StoreError::InvalidFilter(format!(
                            "expected operator after `{}`, found {:?}",
                            word, other
                        )));
                    }
                };
                let value = self.literal()?;
                compare(field, op, value)
            }
            other => Err(StoreError::InvalidFilter(format!(
                "expected a comparison, found {:?}",
                other
            ))),
        }
    }

    fn call(&mut self, function: &str) -> StoreResult<Expr> {
        let op = Op::parse(function)
            .filter(|op| op.is_pattern())
            .ok_or_else(|| StoreError::InvalidFilter(format!("unknown function `{}`", function)))?;
        self.expect(Token::Open)?;
        let field = match self.next()? {
            Token::Word(name) => field(&name)?,
            other => {
                return Err(StoreError::InvalidFilter(format!(
                    "expected a field in `{}`, found {:?}",
                    function, other
                )));
            }
        };
        self.expect(Token::Comma)?;
        let value = self.literal()?;
        self.expect(Token::Close)?;
        compare(field, op, value)
    }

    fn literal(&mut self) -> StoreResult<String> {
        match self.next()? {
            Token::Literal(value) => Ok(value),
            other => Err(StoreError::InvalidFilter(format!(
                "expected a quoted literal, found {:?}",
                other
            ))),
        }
    }
}

fn compare(field: Field, op: Op, value: String) -> StoreResult<Expr> {
    if matches!(field, Field::Property(_)) && matches!(op, Op::Gt | Op::Ge | Op::Lt | Op::Le) {
        return Err(StoreError::InvalidFilter(
            "properties only support eq, ne, startswith, contains and endswith".into(),
        ));
    }
    Ok(Expr::Compare { field, op, value })
}

fn render(expr: &Expr, out: &mut Filter) {
    match expr {
        Expr::And(left, right) | Expr::Or(left, right) => {
            let connective = if matches!(expr, Expr::And(..)) { " AND " } else { " OR " };
            out.clause.push('(');
            render(left, out);
            out.clause.push_str(connective);
            render(right, out);
            out.clause.push(')');
        }
        Expr::Compare {
            field: Field::Column(column),
            op,
            value,
        } => {
            if op.is_pattern() {
                out.clause.push_str(&format!("{} LIKE ? ESCAPE '\\'", column));
                out.params.push(op.pattern(value));
            } else {
                out.clause.push_str(&format!("{} {} ?", column, op.sql()));
                out.params.push(value.clone());
            }
        }
        Expr::Compare {
            field: Field::Property(key),
            op,
            value,
        } => {
            // Scalars and array elements alike: json_each yields one row per value.
            let (negate, test, param) = match op {
                Op::Eq => (false, "CAST(value AS TEXT) = ?", value.clone()),
                Op::Ne => (true, "CAST(value AS TEXT) = ?", value.clone()),
                _ => (false, "CAST(value AS TEXT) LIKE ? ESCAPE '\\'", op.pattern(value)),
            };
            out.clause.push_str(&format!(
                "{}EXISTS (SELECT 1 FROM json_each(items.properties, ?) WHERE {})",
                if negate { "NOT " } else { "" },
                test
            ));
            out.params.push(format!("$.\"{}\"", key));
            out.params.push(param);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_everything() {
        assert_eq!(translate("  ").unwrap(), Filter::all());
    }

    #[test]
    fn comparisons_move_literals_into_params() {
        let filter = translate("name eq 'a.txt' and size gt '10'").unwrap();
        assert_eq!(filter.clause, "(name = ? AND size > ?)");
        assert_eq!(filter.params, vec!["a.txt", "10"]);
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let filter = translate("name eq 'a' or name eq 'b' and size lt '3'").unwrap();
        assert_eq!(filter.clause, "(name = ? OR (name = ? AND size < ?))");
        let grouped = translate("(name eq 'a' or name eq 'b') and size lt '3'").unwrap();
        assert_eq!(grouped.clause, "((name = ? OR name = ?) AND size < ?)");
    }

    #[test]
    fn pattern_functions_escape_wildcards() {
        let filter = translate("startswith(name,'50%_off') or endswith(extension, \"df\")").unwrap();
        assert_eq!(
            filter.clause,
            "(name LIKE ? ESCAPE '\\' OR extension LIKE ? ESCAPE '\\')"
        );
        assert_eq!(filter.params, vec!["50\\%\\_off%", "%df"]);

        let infix = translate("name contains 'port'").unwrap();
        assert_eq!(infix.params, vec!["%port%"]);
    }

    #[test]
    fn property_fields_become_bag_predicates() {
        let filter = translate("properties.tag eq 'invoice'").unwrap();
        assert!(filter.clause.starts_with("EXISTS (SELECT 1 FROM json_each(items.properties, ?)"));
        assert_eq!(filter.params, vec!["$.\"tag\"", "invoice"]);

        let negated = translate("properties.tag ne 'draft'").unwrap();
        assert!(negated.clause.starts_with("NOT EXISTS"));

        assert!(translate("properties.tag gt '1'").is_err());
        assert!(translate("properties.x'y eq '1'").is_err());
    }

    #[test]
    fn injection_attempts_never_reach_the_clause() {
        let filter = translate("name eq 'x'' OR 1=1 --'").unwrap_err();
        assert!(matches!(filter, StoreError::InvalidFilter(_)));

        let filter = translate("name eq \"'; DROP TABLE items; --\"").unwrap();
        assert_eq!(filter.clause, "name = ?");
        assert_eq!(filter.params, vec!["'; DROP TABLE items; --"]);

        assert!(translate("password eq 'x'").is_err());
        assert!(translate("name eq 'x' garbage").is_err());
        assert!(translate("name eq 'open").is_err());
    }

    #[test]
    fn order_clause_is_whitelisted() {
        assert_eq!(order_clause("").unwrap(), "created_at ASC");
        assert_eq!(order_clause("size desc, name").unwrap(), "size DESC, name ASC");
        assert!(order_clause("size; DROP TABLE items").is_err());
        assert!(order_clause("size sideways").is_err());
    }
}
