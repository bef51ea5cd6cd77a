//! Shared fixtures for ledger integration tests
//!
//! Seeds the tables owned by ingestion and user administration:
//!
//! | row | project | sample | variant        |
//! |-----|---------|--------|----------------|
//! | 101 | 1       | A      | BRCA1 17:41245466 G>A |
//! | 102 | 2       | B      | BRCA1 17:41245466 G>A |
//! | 103 | 3       | C      | BRCA1 17:41245466 G>A |
//! | 104 | 1       | A      | BRCA2 13:32914438 T>C |
//! | 105 | 2       | B      | BRCA2 13:32914438 T>C |
//!
//! alice is a member of projects 1 and 2, bob of project 1 only, carol is an
//! administrator without memberships.

#![allow(dead_code)]

use hl_common::db::{CanonicalVariant, VariantSampleId};
use hl_ledger::{Ledger, SessionConfig};
use sqlx::SqlitePool;
use tempfile::TempDir;

pub struct Fixture {
    // Keeps the database directory alive for the test
    pub dir: TempDir,
    pub ledger: Ledger,
}

pub fn brca1() -> CanonicalVariant {
    CanonicalVariant {
        chr: "17".to_string(),
        pos: 41245466,
        length: 1,
        reference: "G".to_string(),
        alternative: "A".to_string(),
        gene_symbol: "BRCA1".to_string(),
    }
}

pub fn brca2() -> CanonicalVariant {
    CanonicalVariant {
        chr: "13".to_string(),
        pos: 32914438,
        length: 1,
        reference: "T".to_string(),
        alternative: "C".to_string(),
        gene_symbol: "BRCA2".to_string(),
    }
}

pub fn rows(ids: &[i64]) -> Vec<VariantSampleId> {
    ids.iter().copied().map(VariantSampleId).collect()
}

pub fn session(actor: &str) -> SessionConfig {
    SessionConfig::new(actor).unwrap()
}

pub async fn setup() -> Fixture {
    let dir = TempDir::new().unwrap();
    let ledger = Ledger::open(&dir.path().join("ledger.db")).await.unwrap();
    seed(ledger.pool()).await;
    Fixture { dir, ledger }
}

async fn seed(pool: &SqlitePool) {
    for (username, is_admin) in [("alice", false), ("bob", false), ("carol", true)] {
        sqlx::query("INSERT INTO users (username, is_admin) VALUES (?, ?)")
            .bind(username)
            .bind(is_admin)
            .execute(pool)
            .await
            .unwrap();
    }

    for (project_id, sample) in [(1, "A"), (2, "B"), (3, "C")] {
        sqlx::query("INSERT INTO projects (project_id, sample) VALUES (?, ?)")
            .bind(project_id)
            .bind(sample)
            .execute(pool)
            .await
            .unwrap();
    }

    for (project_id, username) in [(1, "alice"), (2, "alice"), (1, "bob")] {
        sqlx::query("INSERT INTO projects_users (project_id, username) VALUES (?, ?)")
            .bind(project_id)
            .bind(username)
            .execute(pool)
            .await
            .unwrap();
    }

    let occurrences = [
        (101, 1, brca1()),
        (102, 2, brca1()),
        (103, 3, brca1()),
        (104, 1, brca2()),
        (105, 2, brca2()),
    ];
    for (id, project_id, v) in occurrences {
        sqlx::query(
            "INSERT INTO variant_sample \
             (variant_sample_id, project_id, chr, pos, length, reference, alternative, gene_symbol, zygosity) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'Heterozygous')",
        )
        .bind(id)
        .bind(project_id)
        .bind(&v.chr)
        .bind(v.pos)
        .bind(v.length)
        .bind(&v.reference)
        .bind(&v.alternative)
        .bind(&v.gene_symbol)
        .execute(pool)
        .await
        .unwrap();
    }
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Evaluation records of a variant with a class set
pub async fn classified_records(pool: &SqlitePool, v: &CanonicalVariant) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM variant_evaluations WHERE chr = ? AND pos = ? AND length = ? \
         AND reference = ? AND alternative = ? AND gene_symbol = ? AND evaluation <> 0",
    )
    .bind(&v.chr)
    .bind(v.pos)
    .bind(v.length)
    .bind(&v.reference)
    .bind(&v.alternative)
    .bind(&v.gene_symbol)
    .fetch_one(pool)
    .await
    .unwrap()
}
