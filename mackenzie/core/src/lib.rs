pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod setup_store;
pub mod time;

#[cfg(feature = "prometheus-metrics")]
pub mod metrics;

pub mod tls;

pub use error::{MackenzieError, Result};

/// Generated from `proto/mackenzie.proto`.
pub mod proto {
    tonic::include_proto!("mackenzie");
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::Db;
    use setup_store::SetupStore;

    fn make_tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let buf = Vec::new();
        let encoder = flate2::write::GzEncoder::new(buf, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        let encoder = builder.into_inner().unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn add_setup_is_idempotent_and_rejects_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::temporary().unwrap();
        let store = SetupStore::new(&db, dir.path().join("setups")).unwrap();

        let tar1 = make_tar_gz(&[("A/run_parameters.json", b"{}")]);
        store.install("A", &tar1).unwrap();
        store.install("A", &tar1).unwrap();
        assert_eq!(store.all_names().unwrap(), vec!["A".to_string()]);
        assert!(store.extracted_path("A").is_dir());

        let tar2 = make_tar_gz(&[("A/run_parameters.json", b"{\"different\":true}")]);
        let err = store.install("A", &tar2).unwrap_err();
        assert!(matches!(err, MackenzieError::SemanticConflict(_)));
    }

    #[test]
    fn read_tar_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::temporary().unwrap();
        let store = SetupStore::new(&db, dir.path().join("setups")).unwrap();
        let tar = make_tar_gz(&[("B/run_parameters.json", b"hello")]);
        store.install("B", &tar).unwrap();
        assert_eq!(store.read_tar("B").unwrap(), tar);
    }
}
