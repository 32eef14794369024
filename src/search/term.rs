use nom::{
    IResult, Parser,
    branch::alt,
    character::complete::char,
    combinator::opt,
    number::complete::double,
    sequence::preceded,
};

use crate::core::error::{Error, ErrorKind, Result};

/// How a word term is matched against string values.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchType {
    Exact,
    Prefix,
    Regex,
    Fuzzy {
        max_edits: u8,
        /// Leading characters that must match literally; also guides the
        /// dictionary range scan for enumerated attributes.
        prefix_lock_length: u32,
    },
}

/// Per-query options handed to `create_search_context`. The query parser is
/// an external collaborator; it supplies the raw term plus these knobs.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub match_type: MatchType,
    /// Overrides the attribute's cased flag when set.
    pub cased: Option<bool>,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams { match_type: MatchType::Exact, cased: None }
    }
}

impl SearchParams {
    pub fn prefix() -> Self {
        SearchParams { match_type: MatchType::Prefix, ..Default::default() }
    }

    pub fn regex() -> Self {
        SearchParams { match_type: MatchType::Regex, ..Default::default() }
    }

    pub fn fuzzy(max_edits: u8, prefix_lock_length: u32) -> Self {
        SearchParams {
            match_type: MatchType::Fuzzy { max_edits, prefix_lock_length },
            ..Default::default()
        }
    }
}

/// A parsed numeric term: a closed, open or half-open interval, optionally
/// capped to the first or last `range_limit` hits.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericRange {
    pub lo: Option<f64>,
    pub hi: Option<f64>,
    pub lo_inclusive: bool,
    pub hi_inclusive: bool,
    /// Positive: keep the k first matching lids; negative: the k last.
    pub range_limit: Option<i64>,
}

impl NumericRange {
    pub fn exact(value: f64) -> Self {
        NumericRange {
            lo: Some(value),
            hi: Some(value),
            lo_inclusive: true,
            hi_inclusive: true,
            range_limit: None,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.lo_inclusive && self.hi_inclusive && self.lo.is_some() && self.lo == self.hi
    }

    pub fn contains_f64(&self, v: f64) -> bool {
        if let Some(lo) = self.lo {
            if self.lo_inclusive { if v < lo { return false; } } else if v <= lo { return false; }
        }
        if let Some(hi) = self.hi {
            if self.hi_inclusive { if v > hi { return false; } } else if v >= hi { return false; }
        }
        true
    }

    pub fn contains_i64(&self, v: i64) -> bool {
        self.contains_f64(v as f64)
    }

    /// Integer bounds after coercion; None when the range is empty in the
    /// integer domain.
    pub fn integer_bounds(&self) -> Option<(i64, i64)> {
        let lo = match self.lo {
            Some(lo) => {
                let b = if self.lo_inclusive { lo.ceil() } else { lo.floor() + 1.0 };
                b.max(i64::MIN as f64) as i64
            }
            None => i64::MIN,
        };
        let hi = match self.hi {
            Some(hi) => {
                let b = if self.hi_inclusive { hi.floor() } else { hi.ceil() - 1.0 };
                b.min(i64::MAX as f64) as i64
            }
            None => i64::MAX,
        };
        if lo > hi { None } else { Some((lo, hi)) }
    }
}

fn separator(input: &str) -> IResult<&str, char> {
    alt((char(';'), char(','))).parse(input)
}

fn bracket_range(input: &str) -> IResult<&str, NumericRange> {
    let (input, _) = char('[').parse(input)?;
    let (input, lo) = opt(double).parse(input)?;
    let (input, _) = separator(input)?;
    let (input, hi) = opt(double).parse(input)?;
    let (input, limit) = opt(preceded(separator, double)).parse(input)?;
    let (input, _) = char(']').parse(input)?;
    Ok((
        input,
        NumericRange {
            lo,
            hi,
            lo_inclusive: true,
            hi_inclusive: true,
            range_limit: limit.map(|l| l as i64),
        },
    ))
}

fn open_range(input: &str) -> IResult<&str, NumericRange> {
    let (input, op) = alt((char('<'), char('>'))).parse(input)?;
    let (input, bound) = double(input)?;
    let range = if op == '<' {
        NumericRange { lo: None, hi: Some(bound), lo_inclusive: true, hi_inclusive: false, range_limit: None }
    } else {
        NumericRange { lo: Some(bound), hi: None, lo_inclusive: false, hi_inclusive: true, range_limit: None }
    };
    Ok((input, range))
}

fn exact_literal(input: &str) -> IResult<&str, NumericRange> {
    let (input, v) = double(input)?;
    Ok((input, NumericRange::exact(v)))
}

/// Parses a numeric query term: a literal, `[lo;hi]` / `[lo;hi;limit]` with
/// either bound optional, or `<x` / `>x`.
pub fn parse_numeric_term(term: &str) -> Result<NumericRange> {
    let term = term.trim();
    match alt((bracket_range, open_range, exact_literal)).parse(term) {
        Ok(("", range)) => Ok(range),
        Ok((rest, _)) => Err(Error::new(
            ErrorKind::Parse,
            format!("trailing input '{}' in numeric term '{}'", rest, term),
        )),
        Err(e) => Err(Error::new(
            ErrorKind::Parse,
            format!("invalid numeric term '{}': {:?}", term, e),
        )),
    }
}

/// Parses a boolean query term; `"1"`/`"true"` (any case) match true,
/// `"0"`/`"false"` match false.
pub fn parse_bool_term(term: &str) -> Result<bool> {
    match term.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(Error::new(
            ErrorKind::Parse,
            format!("invalid boolean term '{}'", other),
        )),
    }
}

/// Splits a trailing `*` prefix marker off a word term.
pub fn strip_prefix_marker(term: &str) -> (&str, bool) {
    match term.strip_suffix('*') {
        Some(stripped) => (stripped, true),
        None => (term, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_range_terms() {
        let r = parse_numeric_term("42").unwrap();
        assert!(r.is_exact());
        assert!(r.contains_i64(42) && !r.contains_i64(41));

        let r = parse_numeric_term("[3;11]").unwrap();
        assert!(r.contains_i64(3) && r.contains_i64(11) && !r.contains_i64(12));
        assert_eq!(r.integer_bounds(), Some((3, 11)));

        let r = parse_numeric_term("[3,11]").unwrap();
        assert_eq!(r.integer_bounds(), Some((3, 11)));

        let r = parse_numeric_term("[;10]").unwrap();
        assert!(r.contains_i64(i64::MIN + 1) && !r.contains_i64(11));

        let r = parse_numeric_term("[5;]").unwrap();
        assert!(r.contains_i64(1_000_000) && !r.contains_i64(4));

        let r = parse_numeric_term("[0;100;10]").unwrap();
        assert_eq!(r.range_limit, Some(10));

        let r = parse_numeric_term("<5").unwrap();
        assert!(r.contains_i64(4) && !r.contains_i64(5));
        let r = parse_numeric_term(">5").unwrap();
        assert!(r.contains_i64(6) && !r.contains_i64(5));

        assert!(parse_numeric_term("abc").is_err());
        assert!(parse_numeric_term("[1;2;3;4]").is_err());
    }

    #[test]
    fn fractional_bounds_coerce_for_integers() {
        let r = parse_numeric_term("[2.5;7.5]").unwrap();
        assert_eq!(r.integer_bounds(), Some((3, 7)));
        let r = parse_numeric_term("[2.5;2.6]").unwrap();
        assert_eq!(r.integer_bounds(), None);
    }

    #[test]
    fn bool_terms() {
        assert_eq!(parse_bool_term("1").unwrap(), true);
        assert_eq!(parse_bool_term("TRUE").unwrap(), true);
        assert_eq!(parse_bool_term("0").unwrap(), false);
        assert_eq!(parse_bool_term("False").unwrap(), false);
        assert!(parse_bool_term("yes").is_err());
    }

    #[test]
    fn prefix_marker() {
        assert_eq!(strip_prefix_marker("foo*"), ("foo", true));
        assert_eq!(strip_prefix_marker("foo"), ("foo", false));
    }
}
