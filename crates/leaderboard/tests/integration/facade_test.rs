use std::{collections::HashSet, sync::Arc, thread, time::Duration};

use async_trait::async_trait;
use leaderboard::{
    Error, FacadeStatus, LeaderboardFacade, LeaderboardPage, LeaderboardQuery,
    LeaderboardService, MockConnector, MockLeaderboard, Operation, Period, RankQuery, RankResult,
    ScoreResult, ScoreSubmission,
};

use crate::helpers::{
    config, harness, init_logger, pump_for, pump_until, runtime, unconfigured, Event,
    FixedConnector, MockLeaderboardApi, Recorder, BOARD,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn assert_sorted(ranks: &[u64]) {
    assert!(
        ranks.windows(2).all(|pair| pair[0] < pair[1]),
        "ranks out of order: {:?}",
        ranks
    );
}

fn ranks(page: &LeaderboardPage) -> Vec<u64> {
    page.entries.iter().map(|entry| entry.rank).collect()
}

#[test]
fn test_facade_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<LeaderboardFacade>();
}

#[test]
fn test_submit_delivers_once_on_host_thread() {
    let mut h = harness(config(TIMEOUT));
    let request = h
        .facade
        .submit_score(ScoreSubmission::new(BOARD, "player-123", 42500));

    let mut recorder = Recorder::default();
    assert!(pump_until(&mut h.inbox, &mut recorder, 1));
    pump_for(&mut h.inbox, &mut recorder, Duration::from_millis(50));

    assert_eq!(recorder.events[0].0, request);
    match recorder.single() {
        Event::Submitted(result) => {
            assert!(!result.score_id.is_empty());
            assert!(result.rank > 0);
            assert!(result.is_new_best);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(recorder
        .threads
        .iter()
        .all(|id| *id == thread::current().id()));
}

#[test]
fn test_unconfigured_facade_fails_without_network() {
    let mut h = harness(unconfigured());
    assert_eq!(h.facade.status(), FacadeStatus::Disabled);

    let submit = h
        .facade
        .submit_score(ScoreSubmission::new(BOARD, "player-123", 42500));
    let read = h.facade.get_leaderboard(LeaderboardQuery::new(BOARD));
    let rank = h
        .facade
        .get_player_rank(RankQuery::new(BOARD, "player-123"));

    // Queued before the calls returned, with nothing spawned
    assert_eq!(h.inbox.pending(), 3);
    assert_eq!(h.facade.in_flight(), 0);

    let mut recorder = Recorder::default();
    assert_eq!(h.inbox.pump(&mut recorder), 3);

    for (request, operation) in [
        (submit, Operation::SubmitScore),
        (read, Operation::GetLeaderboard),
        (rank, Operation::GetPlayerRank),
    ] {
        let failure = recorder.failure(request);
        assert_eq!(failure.operation, operation);
        assert_eq!(failure.message, "credential not configured");
    }
    assert_eq!(h.service.call_count(), 0);
    assert_eq!(h.connector.connect_count(), 0);
}

#[test]
fn test_limit_is_clamped_before_dispatch() {
    let mut h = harness(config(TIMEOUT));
    let request = h
        .facade
        .get_leaderboard(LeaderboardQuery::new(BOARD).with_limit(150));

    let mut recorder = Recorder::default();
    assert!(pump_until(&mut h.inbox, &mut recorder, 1));

    recorder.page(request);
    assert_eq!(h.service.last_query().unwrap().limit, 100);
}

#[test]
fn test_cursor_pages_do_not_overlap() {
    let mut h = harness(config(TIMEOUT));
    h.seed(25);

    let mut recorder = Recorder::default();
    let mut cursor = String::new();
    let mut previous_max = 0;
    let mut seen = Vec::new();

    for page_number in 1..=10 {
        let request = h
            .facade
            .get_leaderboard(LeaderboardQuery::new(BOARD).with_limit(10).with_cursor(cursor));
        assert!(pump_until(&mut h.inbox, &mut recorder, page_number));
        let page = recorder.page(request);

        let page_ranks = ranks(&page);
        assert_sorted(&page_ranks);
        assert!(page_ranks[0] > previous_max);
        previous_max = page.max_rank().unwrap();
        seen.extend(page_ranks);

        match page.next_cursor {
            Some(next) if page.has_more => cursor = next,
            _ => break,
        }
    }

    assert_eq!(seen, (1..=25).collect::<Vec<u64>>());
}

#[test]
fn test_entries_sorted_for_every_pagination_mode() {
    let mut h = harness(config(TIMEOUT));
    h.seed(30);

    let queries = [
        LeaderboardQuery::new(BOARD).with_limit(7),
        LeaderboardQuery::new(BOARD).with_limit(7).with_offset(9),
        LeaderboardQuery::new(BOARD).with_limit(7).around_rank(15),
        LeaderboardQuery::new(BOARD).with_limit(100),
    ];
    let requests: Vec<_> = queries
        .into_iter()
        .map(|query| h.facade.get_leaderboard(query))
        .collect();

    let mut recorder = Recorder::default();
    assert!(pump_until(&mut h.inbox, &mut recorder, requests.len()));

    for request in &requests {
        let page = recorder.page(*request);
        assert!(!page.entries.is_empty());
        assert_sorted(&ranks(&page));
        assert_eq!(page.total_entries, 30);
    }
    assert_eq!(recorder.page(requests[1]).min_rank(), Some(10));
    assert!(ranks(&recorder.page(requests[2])).contains(&15));
}

#[test]
fn test_cursor_takes_precedence_over_around_rank() {
    let mut h = harness(config(TIMEOUT));
    h.seed(30);

    let mut recorder = Recorder::default();
    let first = h
        .facade
        .get_leaderboard(LeaderboardQuery::new(BOARD).with_limit(5));
    assert!(pump_until(&mut h.inbox, &mut recorder, 1));
    let cursor = recorder.page(first).next_cursor.unwrap();

    let both = h.facade.get_leaderboard(
        LeaderboardQuery::new(BOARD)
            .with_limit(5)
            .with_cursor(cursor)
            .around_rank(20),
    );
    assert!(pump_until(&mut h.inbox, &mut recorder, 2));

    assert_eq!(ranks(&recorder.page(both)), vec![6, 7, 8, 9, 10]);
}

#[test]
fn test_empty_leaderboard_current_period() {
    let mut h = harness(config(TIMEOUT));
    let request = h.facade.get_leaderboard(
        LeaderboardQuery::new(BOARD)
            .with_limit(5)
            .with_period(Period::Current),
    );

    let mut recorder = Recorder::default();
    assert!(pump_until(&mut h.inbox, &mut recorder, 1));

    let page = recorder.page(request);
    assert_eq!(page.total_entries, 0);
    assert!(!page.has_more);
    assert!(page.entries.is_empty());
    assert_eq!(page.next_cursor, None);
}

#[test]
fn test_unranked_player() {
    let mut h = harness(config(TIMEOUT));
    h.seed(3);
    h.facade
        .get_player_rank(RankQuery::new(BOARD, "never-played"));

    let mut recorder = Recorder::default();
    assert!(pump_until(&mut h.inbox, &mut recorder, 1));

    match recorder.single() {
        Event::Rank(rank) => {
            assert_eq!(*rank, RankResult::unranked());
            assert_eq!(rank.percentile, 0.0);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_reconfigure_while_in_flight() {
    let mut h = harness(config(TIMEOUT));
    h.service.set_latency(Some(Duration::from_millis(150)));

    let request = h
        .facade
        .submit_score(ScoreSubmission::new(BOARD, "player-123", 42500));
    assert_eq!(h.facade.reconfigure(config(TIMEOUT)), FacadeStatus::Ready);
    assert_eq!(h.connector.live_connections(), 2);

    let mut recorder = Recorder::default();
    assert!(pump_until(&mut h.inbox, &mut recorder, 1));
    pump_for(&mut h.inbox, &mut recorder, Duration::from_millis(100));

    assert_eq!(recorder.events[0].0, request);
    assert!(matches!(recorder.single(), Event::Submitted(_)));
    assert_eq!(h.connector.connect_count(), 2);
    assert_eq!(h.connector.live_connections(), 1);
}

#[test]
fn test_repeated_reconfigure_releases_connections() {
    let mut h = harness(config(TIMEOUT));
    for _ in 0..10 {
        h.facade.reconfigure(config(TIMEOUT));
    }
    assert_eq!(h.connector.connect_count(), 11);
    assert_eq!(h.connector.live_connections(), 1);

    assert_eq!(h.facade.reconfigure(unconfigured()), FacadeStatus::Disabled);
    assert_eq!(h.connector.live_connections(), 0);

    let request = h
        .facade
        .submit_score(ScoreSubmission::new(BOARD, "player-123", 1));
    let mut recorder = Recorder::default();
    assert!(pump_until(&mut h.inbox, &mut recorder, 1));
    assert_eq!(
        recorder.failure(request).message,
        "credential not configured"
    );

    assert_eq!(h.facade.reconfigure(config(TIMEOUT)), FacadeStatus::Ready);
    assert_eq!(h.connector.live_connections(), 1);
}

#[test]
fn test_shutdown_then_submit() {
    let mut h = harness(config(TIMEOUT));
    assert!(h.facade.shutdown());
    assert!(!h.facade.shutdown());
    assert_eq!(h.facade.status(), FacadeStatus::ShutDown);
    assert_eq!(h.connector.live_connections(), 0);

    let request = h
        .facade
        .submit_score(ScoreSubmission::new(BOARD, "player-123", 42500));
    let mut recorder = Recorder::default();
    assert!(pump_until(&mut h.inbox, &mut recorder, 1));

    let failure = recorder.failure(request);
    assert_eq!(failure.operation, Operation::SubmitScore);
    assert!(failure.message.contains("shut down"));
    assert_eq!(h.service.call_count(), 0);

    assert_eq!(h.facade.reconfigure(config(TIMEOUT)), FacadeStatus::ShutDown);
    assert_eq!(h.connector.live_connections(), 0);
}

#[test]
fn test_shutdown_discards_in_flight_outcomes() {
    let mut h = harness(config(TIMEOUT));
    h.service.set_latency(Some(Duration::from_millis(200)));

    h.facade
        .submit_score(ScoreSubmission::new(BOARD, "player-123", 42500));
    h.facade.get_player_rank(RankQuery::new(BOARD, "player-123"));
    h.facade.shutdown();

    let mut recorder = Recorder::default();
    pump_for(&mut h.inbox, &mut recorder, Duration::from_millis(400));

    assert!(recorder.events.is_empty());
    assert_eq!(h.facade.in_flight(), 0);
    assert_eq!(h.connector.live_connections(), 0);
}

#[test]
fn test_timeout_surfaces_as_failure() {
    let mut h = harness(config(Duration::from_millis(50)));
    h.service.set_latency(Some(Duration::from_millis(500)));

    let request = h
        .facade
        .get_player_rank(RankQuery::new(BOARD, "player-123"));
    let mut recorder = Recorder::default();
    assert!(pump_until(&mut h.inbox, &mut recorder, 1));

    let failure = recorder.failure(request);
    assert_eq!(failure.operation, Operation::GetPlayerRank);
    assert!(failure.message.contains("timed out"), "{}", failure.message);
}

#[test]
fn test_service_error_is_passed_through() {
    let mut h = harness(config(TIMEOUT));
    let request = h
        .facade
        .get_leaderboard(LeaderboardQuery::new("missing-board"));

    let mut recorder = Recorder::default();
    assert!(pump_until(&mut h.inbox, &mut recorder, 1));

    let failure = recorder.failure(request);
    assert_eq!(failure.operation, Operation::GetLeaderboard);
    assert!(failure
        .message
        .contains("leaderboard missing-board not found"));
}

#[test]
fn test_concurrent_requests_correlate_by_id() {
    let mut h = harness(config(TIMEOUT));
    let issued: HashSet<_> = (0..20)
        .map(|i| {
            h.facade.submit_score(ScoreSubmission::new(
                BOARD,
                format!("player-{}", i),
                i * 100,
            ))
        })
        .collect();
    assert_eq!(issued.len(), 20);

    let mut recorder = Recorder::default();
    assert!(pump_until(&mut h.inbox, &mut recorder, 20));
    pump_for(&mut h.inbox, &mut recorder, Duration::from_millis(50));

    let delivered: HashSet<_> = recorder.events.iter().map(|(id, _)| *id).collect();
    assert_eq!(recorder.events.len(), 20);
    assert_eq!(delivered, issued);
}

#[test]
fn test_metadata_and_idempotency_pass_through() {
    let mut h = harness(config(TIMEOUT));
    let payload: &[u8] = br#"{"level":3,"replay":"AAEC"}"#;
    let submission = ScoreSubmission::new(BOARD, "player-123", 900)
        .with_metadata(payload)
        .with_idempotency_key("match-77");

    h.facade.submit_score(submission.clone());
    let mut recorder = Recorder::default();
    assert!(pump_until(&mut h.inbox, &mut recorder, 1));
    h.facade.submit_score(submission);
    assert!(pump_until(&mut h.inbox, &mut recorder, 2));

    let score_ids: Vec<String> = recorder
        .events
        .iter()
        .map(|(_, event)| match event {
            Event::Submitted(result) => result.score_id.clone(),
            other => panic!("unexpected event {:?}", other),
        })
        .collect();
    assert_eq!(score_ids[0], score_ids[1]);
    assert_eq!(h.service.score_count(BOARD), 1);
    assert_eq!(
        h.service
            .metadata_for(BOARD, &score_ids[0])
            .unwrap()
            .as_bytes(),
        payload
    );
}

#[test]
fn test_connector_failure_leaves_facade_disabled() {
    init_logger();
    let runtime = runtime();
    let service = Arc::new(MockLeaderboard::with_boards(&[BOARD]));
    let connector = Arc::new(MockConnector::new(service));
    connector.refuse_connections(true);

    let (facade, mut inbox) = LeaderboardFacade::with_connector(
        config(TIMEOUT),
        runtime.handle().clone(),
        connector.clone(),
    );
    assert_eq!(facade.status(), FacadeStatus::Disabled);

    let request = facade.get_player_rank(RankQuery::new(BOARD, "player-123"));
    let mut recorder = Recorder::default();
    assert!(pump_until(&mut inbox, &mut recorder, 1));
    let failure = recorder.failure(request);
    assert_eq!(failure.operation, Operation::GetPlayerRank);
    assert!(
        failure
            .message
            .starts_with("failed to connect to leaderboard service"),
        "{}",
        failure.message
    );
    assert!(failure.message.contains("refused connection"));
    assert!(!failure.message.contains("credential not configured"));

    connector.refuse_connections(false);
    assert_eq!(facade.reconfigure(config(TIMEOUT)), FacadeStatus::Ready);
}

#[test]
fn test_validation_failure_skips_service() {
    init_logger();
    let runtime = runtime();
    let mut api = MockLeaderboardApi::new();
    api.expect_submit_score().never();
    api.expect_get_leaderboard().never();

    let (facade, mut inbox) = LeaderboardFacade::with_connector(
        config(TIMEOUT),
        runtime.handle().clone(),
        Arc::new(FixedConnector(Arc::new(api))),
    );

    let submit = facade.submit_score(ScoreSubmission::new(BOARD, "", 10));
    let read = facade.get_leaderboard(LeaderboardQuery::new(" "));
    let mut recorder = Recorder::default();
    assert!(pump_until(&mut inbox, &mut recorder, 2));

    assert!(recorder
        .failure(submit)
        .message
        .contains("player_id cannot be empty"));
    assert!(recorder
        .failure(read)
        .message
        .contains("leaderboard_id cannot be empty"));
}

#[test]
fn test_transient_error_is_not_retried() {
    init_logger();
    let runtime = runtime();
    let mut api = MockLeaderboardApi::new();
    api.expect_get_player_rank()
        .times(1)
        .returning(|_| Err(Error::Transient(String::from("status 503: try later"))));

    let (facade, mut inbox) = LeaderboardFacade::with_connector(
        config(TIMEOUT),
        runtime.handle().clone(),
        Arc::new(FixedConnector(Arc::new(api))),
    );

    let request = facade.get_player_rank(RankQuery::new(BOARD, "player-123"));
    let mut recorder = Recorder::default();
    assert!(pump_until(&mut inbox, &mut recorder, 1));
    pump_for(&mut inbox, &mut recorder, Duration::from_millis(50));

    assert_eq!(recorder.events.len(), 1);
    assert!(recorder
        .failure(request)
        .message
        .contains("temporarily unavailable"));
}

/// Service whose page reads panic mid-call
struct PanickingService;

#[async_trait]
impl LeaderboardService for PanickingService {
    async fn submit_score(&self, _submission: ScoreSubmission) -> Result<ScoreResult, Error> {
        Ok(ScoreResult {
            score_id: String::from("score-1"),
            rank: 1,
            is_new_best: true,
        })
    }

    async fn get_leaderboard(&self, query: LeaderboardQuery) -> Result<LeaderboardPage, Error> {
        panic!("corrupt page for {}", query.leaderboard_id);
    }

    async fn get_player_rank(&self, _query: RankQuery) -> Result<RankResult, Error> {
        Ok(RankResult::unranked())
    }
}

#[test]
fn test_panicking_service_still_notifies() {
    init_logger();
    let runtime = runtime();
    let (facade, mut inbox) = LeaderboardFacade::with_connector(
        config(TIMEOUT),
        runtime.handle().clone(),
        Arc::new(FixedConnector(Arc::new(PanickingService))),
    );

    let read = facade.get_leaderboard(LeaderboardQuery::new(BOARD));
    let rank = facade.get_player_rank(RankQuery::new(BOARD, "player-123"));
    let mut recorder = Recorder::default();
    assert!(pump_until(&mut inbox, &mut recorder, 2));
    pump_for(&mut inbox, &mut recorder, Duration::from_millis(50));

    assert_eq!(recorder.events.len(), 2);
    let failure = recorder.failure(read);
    assert_eq!(failure.operation, Operation::GetLeaderboard);
    assert!(failure.message.contains("aborted"), "{}", failure.message);
    assert!(recorder
        .events
        .iter()
        .any(|(id, event)| *id == rank && matches!(event, Event::Rank(_))));
    assert_eq!(facade.status(), FacadeStatus::Ready);
}

#[test]
fn test_nothing_queued_after_shutdown_returns() {
    let mut h = harness(config(TIMEOUT));
    for i in 0..50 {
        h.facade
            .submit_score(ScoreSubmission::new(BOARD, format!("player-{}", i), i));
    }
    thread::sleep(Duration::from_millis(1));
    h.facade.shutdown();
    let queued = h.inbox.pending();

    let mut recorder = Recorder::default();
    pump_for(&mut h.inbox, &mut recorder, Duration::from_millis(200));

    assert_eq!(recorder.events.len(), queued);
    assert_eq!(h.facade.in_flight(), 0);
}
