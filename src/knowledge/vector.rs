//! Vector Math - 벡터 거리 계산 및 SQL 함수 등록
//!
//! 벡터 인덱스는 SQLite 테이블(`chunk_vectors`)에 직렬화된 임베딩으로 저장되고,
//! 최근접 검색은 `vec_distance_l2(a, b)` SQL 함수로 정렬합니다.

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

use crate::embedding::deserialize_vector;

/// 거리 SQL 함수 이름
pub const DISTANCE_FUNCTION: &str = "vec_distance_l2";

// ============================================================================
// Utility Functions
// ============================================================================

/// 유클리드(L2) 거리
///
/// 길이가 다르면 `f32::INFINITY`를 반환하여 항상 가장 먼 후보가 됩니다.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// `vec_distance_l2(a BLOB, b BLOB) -> REAL` 등록
///
/// 두 인자 모두 little-endian f32 바이트여야 합니다.
pub fn register_distance_function(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        DISTANCE_FUNCTION,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a = ctx
                .get_raw(0)
                .as_blob()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            let b = ctx
                .get_raw(1)
                .as_blob()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;

            let distance = l2_distance(&deserialize_vector(a), &deserialize_vector(b));
            Ok(distance as f64)
        },
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::serialize_vector;

    #[test]
    fn test_l2_distance() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        assert!((l2_distance(&a, &b) - 5.0).abs() < 1e-6);
        assert_eq!(l2_distance(&a, &a), 0.0);
        assert_eq!(l2_distance(&a, &[1.0]), f32::INFINITY);
    }

    #[test]
    fn test_sql_distance_function() {
        let conn = Connection::open_in_memory().unwrap();
        register_distance_function(&conn).unwrap();

        let a = serialize_vector(&[1.0, 0.0]);
        let b = serialize_vector(&[0.0, 1.0]);
        let distance: f64 = conn
            .query_row("SELECT vec_distance_l2(?1, ?2)", [&a, &b], |row| row.get(0))
            .unwrap();

        assert!((distance - 2f64.sqrt()).abs() < 1e-6);
    }
}
