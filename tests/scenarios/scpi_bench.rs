//! Test: SCPI bench - a full run against an emulated oscilloscope on loopback

use crate::helpers::*;
use prober::compiler::PatternCompiler;
use prober::core::{ConnectionType, DataMap, DeviceDescriptor, HardwareRegistry, ParsedProcedure};
use prober::device::{DeviceLifecycleManager, DriverRegistry};
use prober::execution::{ExecutionEngine, SchedulingStrategy, StageRegistry};
use prober::ExperimentResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accept one client, answer queries, and return every command received
async fn emulated_scope() -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut received = Vec::new();

        while let Ok(Some(line)) = lines.next_line().await {
            let reply = match line.as_str() {
                "*IDN?" => Some("AGILENT TECHNOLOGIES,DSO7104A,MY0000,06.00"),
                l if l.starts_with(":MEAS:VPP?") => Some("2.5E+00"),
                _ => None,
            };
            received.push(line);
            if let Some(reply) = reply {
                writer.write_all(format!("{}\n", reply).as_bytes()).await.unwrap();
            }
        }
        received
    });

    (address, server)
}

#[tokio::test]
async fn test_measure_over_scpi() {
    let (address, server) = emulated_scope().await;

    let drivers = DriverRegistry::builtin(Duration::from_secs(2));
    let capabilities = drivers.capability_registry().unwrap();
    let hardware = HardwareRegistry::new().with_device(
        "SCOPE1",
        DeviceDescriptor::new(ConnectionType::Visa, Some(&address), "AgilentDSO7000A"),
    );

    let procedure = ParsedProcedure::new("vpp")
        .with_step(call("SCOPE1", "run_identify"))
        .with_step(call("SCOPE1", "run_stop_acquisition"))
        .with_step(call_and_check("SCOPE1", "run_measure_vpp 1", "<=", "5"));
    let (config, generated) = PatternCompiler::new(&capabilities, &hardware)
        .compile(&procedure, "vpp")
        .unwrap();

    let engine = ExecutionEngine::new(
        DeviceLifecycleManager::new(Arc::new(drivers)),
        StageRegistry::new().with_procedure(generated),
        SchedulingStrategy::Sequential,
    );
    let outcome = engine
        .run(
            &config,
            &hardware,
            DataMap::new(),
            ExperimentResult::new(temp_dir("scpi")),
        )
        .await
        .unwrap();

    assert_completed(&outcome);
    assert_data(&outcome, "SCOPE1.run_measure_vpp", "2.5E+00");
    assert!(outcome
        .data
        .get_text("SCOPE1.run_identify")
        .unwrap()
        .starts_with("AGILENT"));
    assert!(outcome.release_errors.is_empty());

    let received = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, vec!["*IDN?", ":STOP", ":MEAS:VPP? CHAN1"]);
}

/// A closed port fails the connection instead of hanging
#[tokio::test]
async fn test_unreachable_instrument() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let drivers = DriverRegistry::builtin(Duration::from_millis(500));
    let hardware = HardwareRegistry::new().with_device(
        "LASER1",
        DeviceDescriptor::new(ConnectionType::Direct, Some(&address), "TSL_210H"),
    );
    let lifecycle = DeviceLifecycleManager::new(Arc::new(drivers));

    let result = lifecycle.connect(&["LASER1".to_string()], &hardware).await;
    assert!(result.is_err());
}
