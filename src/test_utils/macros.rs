#[macro_export]
macro_rules! assert_next {
    // Error matching by variant, via `PartialEq<WatcherError> for WatcherResult`.
    ($stream: expr, Err($expected_err:expr)) => {
        $crate::assert_next!($stream, Err($expected_err), timeout = 5)
    };
    ($stream: expr, Err($expected_err:expr), timeout = $secs: expr) => {
        let message = tokio::time::timeout(
            std::time::Duration::from_secs($secs),
            tokio_stream::StreamExt::next(&mut $stream),
        )
        .await
        .expect("timed out");
        if let Some(msg) = message {
            let expected = &$expected_err;
            assert_eq!(&msg, expected, "Expected error {:?}, got {:?}", expected, msg);
        } else {
            panic!("Expected error {:?}, but channel was closed", $expected_err);
        }
    };

    // Success matching, unwrapping the `Ok`.
    ($stream: expr, $expected: expr) => {
        $crate::assert_next!($stream, $expected, timeout = 5)
    };
    ($stream: expr, $expected: expr, timeout = $secs: expr) => {
        let message = tokio::time::timeout(
            std::time::Duration::from_secs($secs),
            tokio_stream::StreamExt::next(&mut $stream),
        )
        .await
        .expect("timed out");
        let expected = $expected;
        match message {
            std::option::Option::Some(std::result::Result::Ok(msg)) => {
                assert_eq!(msg, expected, "Expected {:?}, got {:?}", expected, msg);
            }
            std::option::Option::Some(std::result::Result::Err(e)) => {
                panic!("Expected Ok({:?}), got Err({:?})", expected, e);
            }
            std::option::Option::None => {
                panic!("Expected Ok({:?}), but channel was closed", expected);
            }
        }
    };
}

#[macro_export]
macro_rules! assert_closed {
    ($stream: expr) => {
        $crate::assert_closed!($stream, timeout = 5)
    };
    ($stream: expr, timeout = $secs: expr) => {
        let message = tokio::time::timeout(
            std::time::Duration::from_secs($secs),
            tokio_stream::StreamExt::next(&mut $stream),
        )
        .await
        .expect("timed out");
        assert!(message.is_none(), "Expected a closed stream, got {:?}", message)
    };
}

#[macro_export]
macro_rules! assert_empty {
    ($stream: expr) => {{
        let inner = $stream.into_inner();
        assert!(inner.is_empty(), "Stream should have no pending messages");
        tokio_stream::wrappers::ReceiverStream::new(inner)
    }};
}

/// Asserts that the batches a watcher stores cover a height range exactly once, in order.
///
/// Notifications between batches are skipped. Each stored batch must start right after the
/// previous one and stay inside the expected range; the assertion completes once the whole
/// range is covered.
///
/// # Example
///
/// ```ignore
/// let mut handle = watcher.start();
/// assert_range_coverage!(handle.stream(), 100..=349);
/// ```
///
/// # Panics
///
/// * **Timeout**: no batch arrives within the timeout (default 5 seconds, configurable via
///   `timeout = N`).
/// * **Gap or overlap**: a batch does not start at the next expected height.
/// * **Out of bounds**: a batch ends past the expected range.
/// * **Error**: the stream yields an `Err`.
/// * **Stream closed early**: the stream ends before the range is covered.
#[macro_export]
macro_rules! assert_range_coverage {
    ($stream: expr, $expected_range: expr) => {
        $crate::assert_range_coverage!($stream, $expected_range, timeout = 5)
    };
    ($stream: expr, $expected_range: expr, timeout = $secs: expr) => {{
        let expected: ::std::ops::RangeInclusive<u64> = $expected_range;
        let (mut start, end) = (*expected.start(), *expected.end());

        let start_time = tokio::time::Instant::now();
        let timeout_duration = ::std::time::Duration::from_secs($secs);

        // log all stored ranges on failures
        let mut stored_ranges = vec![];

        while start <= end {
            let elapsed = start_time.elapsed();
            assert!(elapsed < timeout_duration, "Timed out. Still expecting: {:#?}", start..=end);

            let time_left = timeout_duration - elapsed;
            let message =
                tokio::time::timeout(time_left, tokio_stream::StreamExt::next(&mut $stream))
                    .await
                    .expect("Timed out waiting for the next stored batch");

            match message {
                std::option::Option::Some(std::result::Result::Ok($crate::WatcherMessage::Stored(batch))) => {
                    stored_ranges.push(batch.from..=batch.to);
                    assert!(
                        start == batch.from && batch.to <= end,
                        "Unexpected batch bounds, expected max. range: {:#?}, got: {:#?}\nPrevious batches:\n{:#?}",
                        start..=end,
                        batch.from..=batch.to,
                        stored_ranges,
                    );
                    start = batch.to + 1;
                }
                std::option::Option::Some(std::result::Result::Ok($crate::WatcherMessage::Notification(_))) => {}
                std::option::Option::Some(std::result::Result::Err(e)) => {
                    panic!("Expected a stored batch, got Err: {e:#?}");
                }
                std::option::Option::None => {
                    panic!("Stream closed without covering range: {:#?}", start..=end);
                }
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    use crate::{Chain, Notification, StoredBatch, WatcherMessage, WatcherResult};

    fn batch(from: u64, to: u64) -> WatcherResult {
        Ok(WatcherMessage::Stored(StoredBatch {
            chain: Chain::Ethereum,
            from,
            to,
            blocks: usize::try_from(to - from + 1).unwrap(),
            messages: 0,
            last_key: None,
        }))
    }

    #[tokio::test]
    async fn range_coverage_skips_notifications() {
        let (tx, rx) = mpsc::channel(10);
        let mut stream = ReceiverStream::new(rx);

        tx.send(Ok(Notification::BackfillStarted { behind: 250 }.into())).await.unwrap();
        tx.send(batch(100, 199)).await.unwrap();
        tx.send(batch(200, 249)).await.unwrap();
        tx.send(Ok(Notification::CaughtUp.into())).await.unwrap();

        assert_range_coverage!(stream, 100..=249);
        assert_next!(stream, Notification::CaughtUp);
        drop(tx);
        assert_closed!(stream);
    }

    #[tokio::test]
    #[should_panic = "Unexpected batch bounds"]
    async fn range_coverage_rejects_gaps() {
        let (tx, rx) = mpsc::channel(10);
        let mut stream = ReceiverStream::new(rx);

        tx.send(batch(100, 149)).await.unwrap();
        tx.send(batch(151, 199)).await.unwrap();

        assert_range_coverage!(stream, 100..=199);
    }
}
