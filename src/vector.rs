//! pgvector literal encoding/decoding, the wire format the extension expects
//! for `vector` columns when passed as text parameters.

/// Serializes an embedding as the `"[x1,x2,...]"` literal pgvector parses.
pub fn to_pgvector_literal(embedding: &[f32]) -> String {
    let mut s = String::with_capacity(embedding.len() * 8 + 2);
    s.push('[');
    for (i, v) in embedding.iter().enumerate() {
        if i > 0 {
            s.push(',');
        }
        s.push_str(&v.to_string());
    }
    s.push(']');
    s
}

/// Parses a `"[x1,x2,...]"` pgvector literal back into a vector.
pub fn from_pgvector_literal(literal: &str) -> Vec<f32> {
    literal
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.trim().parse::<f32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_simple_vector() {
        let v = vec![1.0, -2.5, 0.0, 3.25];
        let lit = to_pgvector_literal(&v);
        assert_eq!(lit, "[1,-2.5,0,3.25]");
        assert_eq!(from_pgvector_literal(&lit), v);
    }

    #[test]
    fn empty_vector_formats_as_empty_brackets() {
        assert_eq!(to_pgvector_literal(&[]), "[]");
        assert!(from_pgvector_literal("[]").is_empty());
    }
}
