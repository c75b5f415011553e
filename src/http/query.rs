//! URL-encoded argument parser for query strings and form bodies.

use memchr::memchr;
use std::{borrow::Cow, collections::HashMap, error, fmt};

/// Decodes one URL-encoded component.
///
/// `+` becomes a space, `%XX` escapes become the byte they name. Malformed
/// escapes are kept verbatim and invalid UTF-8 is replaced lossily.
///
/// # Examples
/// ```
/// use at_web::query::url_decode;
///
/// assert_eq!(url_decode(b"hello%20world%21"), "hello world!");
/// assert_eq!(url_decode(b"a+b"), "a b");
/// assert_eq!(url_decode(b"1%2B1"), "1+1");
/// ```
pub fn url_decode(src: &[u8]) -> String {
    let spaced: Cow<'_, [u8]> = match memchr(b'+', src) {
        Some(_) => Cow::Owned(
            src.iter()
                .map(|&b| if b == b'+' { b' ' } else { b })
                .collect(),
        ),
        None => Cow::Borrowed(src),
    };

    let decoded = urlencoding::decode_binary(&spaced);
    String::from_utf8_lossy(&decoded).into_owned()
}

/// URL-encoded argument parser.
///
/// Splits on `&` and `=` first, then decodes each key and value, so an
/// escaped `%26` or `%3D` never breaks a pair apart.
///
/// # Examples
/// ```rust
/// use at_web::query::Query;
///
/// let params: Vec<(String, String)> = Query::parse(b"a=1&b=2&c", 10).unwrap();
///
/// assert_eq!(params, [
///     ("a".to_string(), "1".to_string()),
///     ("b".to_string(), "2".to_string()),
///     ("c".to_string(), "".to_string()),
/// ]);
/// ```
pub struct Query;

impl Query {
    /// Parses a query string into a new collection.
    ///
    /// A leading `?` is skipped, so `?a=1` and `a=1` are equivalent.
    ///
    /// # Examples
    /// ```
    /// use at_web::query::Query;
    /// use std::collections::HashMap;
    ///
    /// // Deduplicates keys, only the last value remains
    /// let params: HashMap<String, String> = Query::parse(b"key=1&key=2", 10).unwrap();
    /// assert_eq!(params["key"], "2");
    /// ```
    #[inline(always)]
    pub fn parse<C: QueryCollector>(query: &[u8], limit: usize) -> Result<C, Error> {
        let query = query.strip_prefix(b"?").unwrap_or(query);

        let mut result = C::with_capacity(limit);
        Self::parse_into(&mut result, query, limit)?;
        Ok(result)
    }

    /// Parses a query string, appending to an existing collection.
    ///
    /// `limit` applies to the total size of the collection, existing entries
    /// included. The input is taken as is, a leading `?` belongs to the
    /// first key.
    ///
    /// # Examples
    /// ```
    /// use at_web::query::Query;
    ///
    /// let mut collector: Vec<(String, String)> = Vec::new();
    ///
    /// Query::parse_into(&mut collector, b"a=1&b=2", 3).unwrap();
    /// assert!(Query::parse_into(&mut collector, b"c=3&d=4", 3).is_err());
    /// assert_eq!(collector.len(), 3);
    /// ```
    #[inline]
    pub fn parse_into<C: QueryCollector>(
        result: &mut C,
        data: &[u8],
        limit: usize,
    ) -> Result<(), Error> {
        if data.is_empty() {
            return Err(Error::Empty);
        }

        let mut start = 0;
        while start < data.len() {
            let end = memchr(b'&', &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            // `a=1&&b=2`
            if start == end {
                start = end + 1;
                continue;
            }

            if result.length() >= limit {
                return Err(Error::OverLimit(limit));
            }

            let index = memchr(b'=', &data[start..end]).unwrap_or(end - start);
            let split_index = start + index;

            let key = &data[start..split_index];
            let value: &[u8] = match split_index < end {
                true => &data[split_index + 1..end],
                false => b"",
            };

            result.add_param(url_decode(key), url_decode(value));
            start = end + 1;
        }

        Ok(())
    }
}

/// A trait for types that can collect decoded arguments.
///
/// # Examples
/// ```rust
/// use at_web::query::{Query, QueryCollector};
///
/// struct Names(Vec<String>);
///
/// impl QueryCollector for Names {
///     fn add_param(&mut self, key: String, _: String) {
///         self.0.push(key);
///     }
///
///     fn length(&self) -> usize {
///         self.0.len()
///     }
///
///     fn with_capacity(capacity: usize) -> Self {
///         Names(Vec::with_capacity(capacity))
///     }
/// }
///
/// let names: Names = Query::parse(b"x=1&y=2", 4).unwrap();
/// assert_eq!(names.0, ["x", "y"]);
/// ```
pub trait QueryCollector
where
    Self: Sized,
{
    /// Adds a decoded argument.
    fn add_param(&mut self, key: String, value: String);

    /// Returns the current number of arguments in the collection.
    fn length(&self) -> usize;

    /// Creates a new collection with the specified capacity.
    fn with_capacity(capacity: usize) -> Self;
}

// Preserves argument order and duplicates
impl QueryCollector for Vec<(String, String)> {
    #[inline(always)]
    fn add_param(&mut self, key: String, value: String) {
        self.push((key, value));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }
}

// Last value wins
impl QueryCollector for HashMap<String, String> {
    #[inline(always)]
    fn add_param(&mut self, key: String, value: String) {
        self.insert(key, value);
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity(capacity)
    }
}

/// Error types that can occur during argument parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The number of arguments exceeded the specified limit.
    ///
    /// # Fields
    /// - `0`: The maximum allowed number of arguments
    OverLimit(usize),

    /// The input is empty.
    Empty,
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OverLimit(limit) => {
                write!(f, "Argument limit exceeded: limit={}", limit)
            }
            Error::Empty => {
                write!(f, "Query string is empty")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn basic() {
        let cases = ["a=1&b=2&c", "?a=1&b=2&c"];

        for line in cases {
            let params: Vec<(String, String)> = Query::parse(line.as_bytes(), 8).unwrap();

            assert_eq!(params.len(), 3);
            assert_eq!(pair(&params[0]), ("a", "1"));
            assert_eq!(pair(&params[1]), ("b", "2"));
            assert_eq!(pair(&params[2]), ("c", ""));
        }
    }

    #[test]
    fn full() {
        let line = b"flag&empty=&=val&&key=value&dup=1&dup=2";
        let params: Vec<(String, String)> = Query::parse(line, 10).unwrap();

        assert_eq!(params.len(), 6);
        assert_eq!(pair(&params[0]), ("flag", ""));
        assert_eq!(pair(&params[1]), ("empty", ""));
        assert_eq!(pair(&params[2]), ("", "val"));
        assert_eq!(pair(&params[3]), ("key", "value"));
        assert_eq!(pair(&params[4]), ("dup", "1"));
        assert_eq!(pair(&params[5]), ("dup", "2"));
    }

    #[test]
    fn decoded_after_split() {
        let params: Vec<(String, String)> =
            Query::parse(b"q=a%26b%3Dc&name=John+Smith&e=%E2%82%AC", 10).unwrap();

        assert_eq!(pair(&params[0]), ("q", "a&b=c"));
        assert_eq!(pair(&params[1]), ("name", "John Smith"));
        assert_eq!(pair(&params[2]), ("e", "€"));
    }

    #[test]
    fn decode() {
        #[rustfmt::skip]
        let cases: [(&[u8], &str); 7] = [
            (b"hello%20world%21", "hello world!"),
            (b"a+b",              "a b"),
            (b"%2B",              "+"),
            (b"100%",             "100%"),
            (b"%zz",              "%zz"),
            (b"%ff",              "\u{FFFD}"),
            (b"",                 ""),
        ];

        for (src, expected) in cases {
            assert_eq!(url_decode(src), expected);
        }
    }

    #[test]
    fn question_mark_only_skipped_by_parse() {
        let mut params: Vec<(String, String)> = Vec::new();
        Query::parse_into(&mut params, b"?a=1", 10).unwrap();
        assert_eq!(pair(&params[0]), ("?a", "1"));

        let params: Vec<(String, String)> = Query::parse(b"?a=1", 10).unwrap();
        assert_eq!(pair(&params[0]), ("a", "1"));
    }

    #[test]
    fn limit_error() {
        assert_eq!(
            Query::parse::<Vec<(String, String)>>(b"a&a", 1),
            Err(Error::OverLimit(1))
        );
    }

    #[test]
    fn empty_error() {
        assert_eq!(
            Query::parse::<Vec<(String, String)>>(b"", 10),
            Err(Error::Empty)
        );
    }
}
