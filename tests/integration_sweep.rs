use anyhow::Result;
use file_stress::{
    benchmark::{BenchmarkConfig, BenchmarkRunner, NoWait},
    cli::{ExecutorType, Operation},
    executor::{ProcessExecutor, ThreadExecutor, WorkerExecutor},
    metrics::RecordStatus,
    results::ResultsManager,
    server::{FileProtocol, FileServer, ServerConfig},
    worker::WorkerJob,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

async fn start_server(storage: &Path) -> Result<u16> {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        pool_size: 4,
        ..ServerConfig::default()
    };
    let server = FileServer::bind(config, Arc::new(FileProtocol::new(storage)?)).await?;
    let port = server.local_addr()?.port();
    tokio::spawn(server.run_until(std::future::pending()));
    Ok(port)
}

fn job(
    worker_id: usize,
    operation: Operation,
    server: &str,
    test_file: &Path,
    downloads: &Path,
) -> WorkerJob {
    WorkerJob {
        worker_id,
        operation,
        server: server.to_string(),
        test_file: Some(test_file.to_path_buf()),
        download_dir: downloads.to_path_buf(),
        io_timeout: Duration::from_secs(30),
    }
}

/// One worker asking for a file that does not exist fails alone; its
/// siblings in the same batch still succeed.
#[tokio::test]
async fn failing_worker_does_not_affect_siblings() -> Result<()> {
    let storage = tempdir()?;
    let scratch = tempdir()?;
    let port = start_server(storage.path()).await?;
    let addr = format!("127.0.0.1:{}", port);

    std::fs::write(storage.path().join("present.bin"), vec![1u8; 2048])?;
    let present = scratch.path().join("present.bin");
    let absent = scratch.path().join("absent.bin");
    let downloads = scratch.path().join("downloads");

    let jobs = vec![
        job(0, Operation::Download, &addr, &present, &downloads),
        job(1, Operation::Download, &addr, &absent, &downloads),
        job(2, Operation::Download, &addr, &present, &downloads),
    ];
    let records = ThreadExecutor.execute(jobs).await;

    let statuses: Vec<RecordStatus> = records.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![RecordStatus::Ok, RecordStatus::Error, RecordStatus::Ok]
    );
    assert!(downloads.join("worker0_present.bin").exists());
    assert!(!downloads.join("worker1_absent.bin").exists());
    Ok(())
}

/// Child-process workers produce the same records as in-process ones.
#[tokio::test]
async fn process_executor_runs_workers_in_children() -> Result<()> {
    let storage = tempdir()?;
    let scratch = tempdir()?;
    let port = start_server(storage.path()).await?;
    let addr = format!("127.0.0.1:{}", port);

    let source = scratch.path().join("upload.bin");
    std::fs::write(&source, vec![9u8; 64 * 1024])?;
    let downloads = scratch.path().join("downloads");

    let executor = ProcessExecutor::with_program(env!("CARGO_BIN_EXE_file-stress"));
    let jobs = (0..3)
        .map(|id| job(id, Operation::Upload, &addr, &source, &downloads))
        .collect();
    let records = executor.execute(jobs).await;

    assert_eq!(records.len(), 3);
    for (id, record) in records.iter().enumerate() {
        assert_eq!(record.worker_id, id);
        assert_eq!(record.status, RecordStatus::Ok, "{:?}", record.error);
        assert_eq!(record.file_size, 64 * 1024);
    }
    assert_eq!(std::fs::read(storage.path().join("upload.bin"))?.len(), 64 * 1024);
    Ok(())
}

/// A small unattended sweep writes a CSV with one row per configuration and
/// a TOTAL row.
#[tokio::test]
async fn sweep_writes_csv_report() -> Result<()> {
    let storage = tempdir()?;
    let scratch = tempdir()?;
    let port = start_server(storage.path()).await?;

    let config = BenchmarkConfig {
        host: "127.0.0.1".to_string(),
        port,
        operations: Operation::expand_all(vec![Operation::All]),
        file_sizes_mb: vec![1],
        client_pools: vec![1, 2],
        server_pools: vec![4],
        executors: vec![ExecutorType::Thread],
        testfiles_dir: scratch.path().join("testfiles"),
        downloads_dir: scratch.path().join("downloads"),
        io_timeout: Duration::from_secs(30),
    };

    let mut results = ResultsManager::new(scratch.path().join("reports"));
    let mut runner = BenchmarkRunner::new(config, Box::new(NoWait));
    runner.run(&mut results).await?;
    let files = results.finalize()?;

    let csv = std::fs::read_to_string(&files.csv)?;
    let lines: Vec<&str> = csv.lines().collect();
    // header + 3 operations x 2 client pools + TOTAL
    assert_eq!(lines.len(), 1 + 6 + 1);
    assert!(lines[1].starts_with("1,list,1,1,4,"));
    assert!(lines[3].starts_with("3,download,1,1,4,"));
    assert!(lines[6].starts_with("6,upload,1,2,4,"));
    assert_eq!(lines[7], "TOTAL,,,,,,,9,0,");
    assert!(files.json.exists());
    Ok(())
}
