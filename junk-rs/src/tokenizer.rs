//! Word extraction for classification
//!
//! Subject and body are folded to lower-case ASCII, HTML and MIME boilerplate
//! is removed, and only plain alphabetic words of 4 to 10 letters survive.
//! Only the first 200 such words count; words repeated more than 10 times
//! among them are dropped as noise.

use regex::Regex;
use std::collections::{BTreeSet, HashMap};

use crate::error::{JunkError, Result};

const MAX_WORDS: usize = 200;
const MAX_OCCURRENCES: usize = 10;

/// Fragments replaced by a space before splitting into words
const BOILERPLATE: &[&str] = &[
    "boundary=",
    "charset",
    "content-transfer-encoding",
    "content-type",
    "image/jpeg",
    "multipart/alternative",
    "multipart/related",
    "name=",
    "nextpart",
    "quoted-printable",
    "text/html",
    "text/plain",
    "this email must be viewed in html mode",
    "this is a multi-part message in mime format",
    "windows-1251",
    "windows-1252",
    "!", "#", "$", "%", "&", "'", "(", ")", "*", "+", ",", ". ", "<", "=", ">",
    "?", "@", "[", "\"", "\\", "]", "^", "_", "{", "|", "}",
];

/// Inline base64 payloads start here; everything after it is dropped
const BASE64_MARKER: &str = "Content-Transfer-Encoding: base64";

pub struct Tokenizer {
    markup_block: Regex,
    html_tag: Regex,
    html_entity: Regex,
    word: Regex,
}

impl Tokenizer {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| JunkError::TokenExtraction(e.to_string()))
        };

        Ok(Self {
            markup_block: compile(r"(?is)<(style|script)\b[^>]*>.*?</(style|script)\s*>")?,
            html_tag: compile(r"(?s)<[^>]*>")?,
            html_entity: compile(r"&#?[a-zA-Z0-9]+;")?,
            word: compile(r"^[a-z]{4,10}$")?,
        })
    }

    /// Sorted, de-duplicated word list for a mail
    pub fn tokenize(&self, subject: &str, body: &str) -> Vec<String> {
        let text = format!("{} {}", self.clean(subject), self.clean(body));

        let candidates: Vec<&str> = text
            .split_whitespace()
            .filter(|w| self.word.is_match(w))
            .take(MAX_WORDS)
            .collect();

        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        for word in &candidates {
            *occurrences.entry(*word).or_default() += 1;
        }

        occurrences
            .into_iter()
            .filter(|(_, count)| *count <= MAX_OCCURRENCES)
            .map(|(word, _)| word.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn clean(&self, input: &str) -> String {
        let input = match input.find(BASE64_MARKER) {
            Some(idx) => &input[..idx],
            None => input,
        };

        let text = self.markup_block.replace_all(input, " ");
        let text = self.html_tag.replace_all(&text, " ");
        let text = self.html_entity.replace_all(&text, " ");

        let mut text = fold_accents(&text.to_lowercase());
        text.push(' ');
        for fragment in BOILERPLATE {
            if text.contains(fragment) {
                text = text.replace(fragment, " ");
            }
        }
        text
    }
}

/// Replace accented latin letters with their ASCII base letters
fn fold_accents(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => out.push('a'),
            'æ' => out.push_str("ae"),
            'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => out.push('c'),
            'ď' | 'đ' => out.push('d'),
            'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => out.push('e'),
            'ĝ' | 'ğ' | 'ġ' | 'ģ' => out.push('g'),
            'ĥ' | 'ħ' => out.push('h'),
            'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => out.push('i'),
            'ĵ' => out.push('j'),
            'ķ' => out.push('k'),
            'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => out.push('l'),
            'ñ' | 'ń' | 'ņ' | 'ň' => out.push('n'),
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => out.push('o'),
            'œ' => out.push_str("oe"),
            'ŕ' | 'ŗ' | 'ř' => out.push('r'),
            'ś' | 'ŝ' | 'ş' | 'š' => out.push('s'),
            'ß' => out.push_str("ss"),
            'ţ' | 'ť' | 'ŧ' => out.push('t'),
            'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => out.push('u'),
            'ŵ' => out.push('w'),
            'ý' | 'ÿ' | 'ŷ' => out.push('y'),
            'ź' | 'ż' | 'ž' => out.push('z'),
            'þ' => out.push_str("th"),
            'ð' => out.push('d'),
            _ => out.push(c),
        }
    }
    out
}
