//! Output multiplexer: full capture versus live tail.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use scan_agent::execution::multiplexer::OutputMultiplexer;

#[tokio::test]
async fn full_capture_keeps_every_byte_when_tail_overflows() {
    let input: Vec<u8> = (0..10).flat_map(|i| format!("line {i}\n").into_bytes()).collect();
    let (tail_tx, mut tail_rx) = mpsc::channel(1);

    let capture = OutputMultiplexer::new("job-full", tail_tx)
        .run(input.as_slice(), CancellationToken::new())
        .await;

    assert_eq!(capture.bytes.as_ref(), input.as_slice());
    assert_eq!(capture.units, 10);
    assert_eq!(capture.tail_skipped, 9);

    // The queued unit is the oldest one; newer units were skipped.
    let first = tail_rx.recv().await.unwrap();
    assert_eq!(first.sequence, 0);
    assert_eq!(first.data.as_ref(), b"line 0\n");
    assert!(tail_rx.recv().await.is_none(), "tail must be closed after EOF");
}

#[tokio::test]
async fn unterminated_final_line_is_captured() {
    let (tail_tx, mut tail_rx) = mpsc::channel(8);

    let capture = OutputMultiplexer::new("job-eof", tail_tx)
        .run(&b"first\nlast without newline"[..], CancellationToken::new())
        .await;

    assert_eq!(capture.bytes.as_ref(), b"first\nlast without newline");
    assert_eq!(tail_rx.recv().await.unwrap().data.as_ref(), b"first\n");
    assert_eq!(
        tail_rx.recv().await.unwrap().data.as_ref(),
        b"last without newline"
    );
}

#[tokio::test]
async fn stop_token_ends_pump_and_keeps_buffered_bytes() {
    let (mut writer, reader) = tokio::io::duplex(1024);
    let (tail_tx, _tail_rx) = mpsc::channel(8);
    let stop = CancellationToken::new();

    let pump = tokio::spawn(OutputMultiplexer::new("job-stop", tail_tx).run(reader, stop.clone()));

    writer.write_all(b"complete\npartial").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.cancel();

    let capture = tokio::time::timeout(Duration::from_secs(2), pump)
        .await
        .expect("pump must stop")
        .unwrap();
    assert_eq!(capture.bytes.as_ref(), b"complete\npartial");
    drop(writer);
}

#[tokio::test]
async fn capture_is_mirrored_to_log_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("engine_stderr.log");
    let (tail_tx, _tail_rx) = mpsc::channel(8);

    let capture = OutputMultiplexer::new("job-file", tail_tx)
        .with_log_file(&path)
        .await
        .run(&b"a\nb\nc"[..], CancellationToken::new())
        .await;

    assert_eq!(std::fs::read(&path).unwrap(), capture.bytes.as_ref());
}

#[tokio::test]
async fn unwritable_log_file_does_not_affect_capture() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("missing-dir").join("engine_stderr.log");
    let (tail_tx, _tail_rx) = mpsc::channel(8);

    let capture = OutputMultiplexer::new("job-nofile", tail_tx)
        .with_log_file(&path)
        .await
        .run(&b"still captured\n"[..], CancellationToken::new())
        .await;

    assert_eq!(capture.bytes.as_ref(), b"still captured\n");
}
