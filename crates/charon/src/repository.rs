//! Read-only access to problems and their test cases.

use olympus_common::{AppError as JudgeError, ProblemId, ProblemPk};
use sqlx::PgPool;

/// One stored test case, payloads still in their raw escaped form.
#[derive(Debug, Clone)]
pub struct TestCaseRow {
    pub ordinal: i32,
    pub input_data: String,
    pub output_data: String,
}

/// A problem with its test cases already loaded, ordered by ordinal ascending.
#[derive(Debug, Clone)]
pub struct Problem {
    pub pk: ProblemPk,
    pub problem_id: ProblemId,
    pub test_cases: Vec<TestCaseRow>,
}

#[derive(sqlx::FromRow)]
struct ProblemRow {
    id: ProblemPk,
    problem_id: ProblemId,
}

/// Raw shape of a `test_cases` row: just the four columns §6's database contract names. There is
/// no stored ordinal column, so row order has to come from the query's `ORDER BY id` and the
/// ordinal is assigned by position after fetching.
#[derive(sqlx::FromRow)]
struct TestCaseSqlRow {
    id: i64,
    input_data: String,
    output_data: String,
}

pub struct ProblemRepository {
    pool: PgPool,
}

impl ProblemRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetches a Problem and its TestCases in one logical round trip: first locate the Problem
    /// row by its external id, then pull its test cases joined on the Problem's primary key —
    /// never on `problem_id + 1`, the off-by-one the reference grading server's query carried.
    pub async fn load_problem(&self, problem_id: ProblemId) -> Result<Problem, JudgeError> {
        let problem_row = sqlx::query_as::<_, ProblemRow>(
            r#"SELECT id, problem_id FROM problems WHERE problem_id = $1"#,
        )
        .bind(problem_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| JudgeError::NotFound(format!("problem {problem_id}")))?;

        // `test_cases` carries no stored ordinal (§6's schema is `id PK, problem_id FK,
        // input_data, output_data` only); order by the primary key and assign the 1-based
        // ordinal from row position.
        let rows = sqlx::query_as::<_, TestCaseSqlRow>(
            r#"
            SELECT id, input_data, output_data
            FROM test_cases
            WHERE problem_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(problem_row.id)
        .fetch_all(&self.pool)
        .await?;

        let test_cases: Vec<TestCaseRow> = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| TestCaseRow {
                ordinal: i as i32 + 1,
                input_data: row.input_data,
                output_data: row.output_data,
            })
            .collect();

        if test_cases.is_empty() {
            return Err(JudgeError::NotFound(format!(
                "problem {problem_id} has no test cases"
            )));
        }

        Ok(Problem {
            pk: problem_row.id,
            problem_id: problem_row.problem_id,
            test_cases,
        })
    }
}

/// Decodes the escape sequences test-case payloads are stored with (`\n \t \r \\ \"`) and strips
/// at most one pair of surrounding double quotes.
pub fn decode_payload(raw: &str) -> String {
    let stripped = strip_one_quote_pair(raw);
    let mut out = String::with_capacity(stripped.len());
    let mut chars = stripped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn strip_one_quote_pair(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_standard_escapes() {
        assert_eq!(decode_payload(r"1 2\n"), "1 2\n");
        assert_eq!(decode_payload(r"a\tb\r\n"), "a\tb\r\n");
        assert_eq!(decode_payload(r#"\"quoted\""#), "\"quoted\"");
        assert_eq!(decode_payload(r"back\\slash"), "back\\slash");
    }

    #[test]
    fn strips_one_pair_of_surrounding_quotes() {
        assert_eq!(decode_payload("\"1 2\""), "1 2");
        assert_eq!(decode_payload("\"\"1 2\"\""), "\"1 2\"");
    }

    #[test]
    fn leaves_unescaped_text_untouched() {
        assert_eq!(decode_payload("plain text"), "plain text");
    }
}
