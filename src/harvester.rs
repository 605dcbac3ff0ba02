/// file: src/harvester.rs
/// description: Scroll-until-stable harvesting loop for one infinite-scroll page.
/// Scroll harvester — loads a target page, scrolls its list container one
/// viewport at a time and stops once the item count has not grown for
/// `stall_limit` consecutive cycles (or `max_scrolls` cycles ran).
///
/// Completion is detected by polling the item count instead of waiting for
/// network idle: infinite-scroll pages keep background connections open.
use crate::config::HarvestConfig;
use crate::models::AppError;
use crate::session::PageSession;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestState {
    Loading,
    Scrolling,
    Stalled,
    Done,
    Failed,
}

/// Why the scroll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// No growth for `stall_limit` consecutive cycles.
    Stalled,
    /// `max_scrolls` cycles ran.
    CapReached,
    /// A DOM call failed mid-loop; the last snapshot is kept.
    Interrupted,
}

/// Result of harvesting one page.
#[derive(Debug, Clone)]
pub struct Harvest {
    /// Texts captured at the last cycle where the item count changed.
    pub texts: Vec<String>,
    pub item_count: usize,
    pub cycles: u32,
    pub termination: Termination,
}

#[derive(Debug)]
struct ScrollState {
    consecutive_stall_count: u32,
    last_observed_count: usize,
}

impl ScrollState {
    fn new(initial_count: usize) -> Self {
        Self {
            consecutive_stall_count: 0,
            last_observed_count: initial_count,
        }
    }

    fn observe(&mut self, count: usize, stall_limit: u32) -> HarvestState {
        if count == self.last_observed_count {
            self.consecutive_stall_count += 1;
            if self.consecutive_stall_count >= stall_limit {
                HarvestState::Done
            } else {
                HarvestState::Stalled
            }
        } else {
            self.consecutive_stall_count = 0;
            self.last_observed_count = count;
            HarvestState::Scrolling
        }
    }
}

pub struct ScrollHarvester {
    cfg: HarvestConfig,
}

impl ScrollHarvester {
    pub fn new(cfg: HarvestConfig) -> Self {
        Self { cfg }
    }

    /// Harvest `url`. Fails only when the page cannot be loaded or the item
    /// list never attaches. A DOM error after that ends the harvest as
    /// `Interrupted`, with an empty snapshot if nothing was read yet.
    pub async fn harvest<S>(&self, session: &mut S, url: &str) -> Result<Harvest, AppError>
    where
        S: PageSession + ?Sized,
    {
        let cfg = &self.cfg;
        debug!(url, state = ?HarvestState::Loading, "Loading target");

        session.load(url).await?;
        session
            .wait_for_any_item(&cfg.item_selector, cfg.item_wait_timeout)
            .await?;

        let first_read = async {
            let count = session.count_items(&cfg.item_selector).await?;
            let texts = session.read_item_texts(&cfg.full_selector).await?;
            Ok::<_, AppError>((count, texts))
        }
        .await;
        let (initial, mut snapshot) = match first_read {
            Ok(first) => first,
            Err(e) => {
                warn!(url, error = %e, "Initial read failed; nothing collected");
                return Ok(Harvest {
                    texts: Vec::new(),
                    item_count: 0,
                    cycles: 0,
                    termination: Termination::Interrupted,
                });
            }
        };
        let mut scroll = ScrollState::new(initial);
        debug!(url, rows = initial, state = ?HarvestState::Scrolling, "Rows visible immediately");

        let mut cycles = 0u32;
        let termination = loop {
            if cycles >= cfg.max_scrolls {
                warn!(url, max_scrolls = cfg.max_scrolls, "Scroll cap reached");
                break Termination::CapReached;
            }
            cycles += 1;

            let count = match self.cycle(session).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(url, cycle = cycles, error = %e, "Scroll cycle failed; keeping last snapshot");
                    break Termination::Interrupted;
                }
            };

            match scroll.observe(count, cfg.stall_limit) {
                HarvestState::Done => {
                    debug!(url, stall_limit = cfg.stall_limit, "No new rows; stopping");
                    break Termination::Stalled;
                }
                HarvestState::Stalled => {
                    trace!(url, stalls = scroll.consecutive_stall_count, "No growth this cycle");
                }
                _ => match session.read_item_texts(&cfg.full_selector).await {
                    Ok(texts) => {
                        snapshot = texts;
                        debug!(url, rows = count, "Rows collected");
                    }
                    Err(e) => {
                        warn!(url, cycle = cycles, error = %e, "Text read failed; keeping last snapshot");
                        break Termination::Interrupted;
                    }
                },
            }
        };

        info!(
            url,
            rows = snapshot.len(),
            items = scroll.last_observed_count,
            cycles,
            ?termination,
            "Harvest finished"
        );

        Ok(Harvest {
            texts: snapshot,
            item_count: scroll.last_observed_count,
            cycles,
            termination,
        })
    }

    /// One scroll / settle / count cycle.
    async fn cycle<S>(&self, session: &mut S) -> Result<usize, AppError>
    where
        S: PageSession + ?Sized,
    {
        let cfg = &self.cfg;
        session.scroll_one_viewport(&cfg.anchor_selector).await?;

        // The spinner may never show up; both waits are best-effort.
        if let Some(loader) = &cfg.loader_selector
            && session
                .wait_for_presence(loader, true, cfg.loader_appear_timeout)
                .await?
            && !session
                .wait_for_presence(loader, false, cfg.loader_vanish_timeout)
                .await?
        {
            trace!(loader, "Loader still attached after vanish timeout");
        }

        tokio::time::sleep(cfg.settle).await;
        session.count_items(&cfg.item_selector).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountScript, FakeFailure, FakePage, FakeSession, test_harvest_config};
    use std::time::Duration;

    const URL: &str = "https://x/in/abc/details/interests/";

    fn session_with(page: FakePage) -> FakeSession {
        FakeSession::new().with_page(URL, page)
    }

    #[tokio::test]
    async fn constant_count_terminates_within_stall_limit() {
        let cfg = test_harvest_config();
        let mut session = session_with(FakePage::new(CountScript::Constant(5)));

        let h = ScrollHarvester::new(cfg.clone())
            .harvest(&mut session, URL)
            .await
            .unwrap();

        assert_eq!(h.termination, Termination::Stalled);
        assert_eq!(h.cycles, cfg.stall_limit);
        assert_eq!(h.texts.len(), 5);
    }

    #[tokio::test]
    async fn endlessly_growing_page_stops_at_scroll_cap() {
        let cfg = test_harvest_config();
        let mut session = session_with(FakePage::new(CountScript::Growing { start: 1 }));

        let h = ScrollHarvester::new(cfg.clone())
            .harvest(&mut session, URL)
            .await
            .unwrap();

        assert_eq!(h.termination, Termination::CapReached);
        assert_eq!(h.cycles, cfg.max_scrolls);
        assert_eq!(session.scroll_calls, cfg.max_scrolls);
        assert_eq!(h.item_count, 1 + cfg.max_scrolls as usize);
    }

    #[tokio::test]
    async fn stall_counter_resets_on_growth() {
        let cfg = test_harvest_config();
        let script = CountScript::Sequence(vec![2, 4, 4, 4, 7, 7, 7, 7]);
        let mut session = session_with(FakePage::new(script));

        let h = ScrollHarvester::new(cfg)
            .harvest(&mut session, URL)
            .await
            .unwrap();

        // 4 grows, two stalls, 7 grows, then three stalls end the loop
        assert_eq!(h.cycles, 7);
        assert_eq!(h.termination, Termination::Stalled);
        assert_eq!(h.item_count, 7);
        assert_eq!(h.texts.len(), 7);
    }

    #[tokio::test]
    async fn texts_are_only_read_on_growth_cycles() {
        let cfg = test_harvest_config();
        let script = CountScript::Sequence(vec![1, 2, 3, 3, 3, 3]);
        let mut session = session_with(FakePage::new(script));

        ScrollHarvester::new(cfg)
            .harvest(&mut session, URL)
            .await
            .unwrap();

        // initial snapshot + two growth cycles
        assert_eq!(session.text_reads, 3);
    }

    #[tokio::test]
    async fn unreadable_list_after_attach_is_an_empty_interrupted_harvest() {
        let mut session = session_with(
            FakePage::new(CountScript::Constant(4)).failing(FakeFailure::TextsUnreadable),
        );

        let h = ScrollHarvester::new(test_harvest_config())
            .harvest(&mut session, URL)
            .await
            .unwrap();

        assert_eq!(h.termination, Termination::Interrupted);
        assert!(h.texts.is_empty());
        assert_eq!(h.cycles, 0);
        assert_eq!(session.scroll_calls, 0);
    }

    const LOADER: &str = "div.loader";

    fn loader_config() -> HarvestConfig {
        HarvestConfig {
            loader_selector: Some(LOADER.to_string()),
            loader_appear_timeout: Duration::from_millis(10),
            loader_vanish_timeout: Duration::from_millis(10),
            ..test_harvest_config()
        }
    }

    async fn harvest_with_loader(loader: CountScript) -> (Harvest, FakeSession) {
        // one growth cycle, then three stalls
        let page =
            FakePage::new(CountScript::Sequence(vec![2, 3, 3, 3, 3])).with_loader(LOADER, loader);
        let mut session = session_with(page);
        let h = ScrollHarvester::new(loader_config())
            .harvest(&mut session, URL)
            .await
            .unwrap();
        (h, session)
    }

    #[tokio::test]
    async fn loader_that_never_appears_does_not_change_the_loop() {
        let (h, session) = harvest_with_loader(CountScript::Constant(0)).await;

        assert_eq!(h.termination, Termination::Stalled);
        assert_eq!(h.cycles, 4);
        assert_eq!(h.item_count, 3);
        assert!(session.loader_checks >= h.cycles);
    }

    #[tokio::test]
    async fn loader_stuck_past_vanish_timeout_does_not_change_the_loop() {
        let (h, session) = harvest_with_loader(CountScript::Constant(1)).await;

        assert_eq!(h.termination, Termination::Stalled);
        assert_eq!(h.cycles, 4);
        assert_eq!(h.item_count, 3);
        // one appear check plus at least one vanish check per cycle
        assert!(session.loader_checks >= 2 * h.cycles);
    }

    #[tokio::test]
    async fn loader_that_appears_then_vanishes_is_waited_out() {
        let (h, session) = harvest_with_loader(CountScript::Sequence(vec![1, 0])).await;

        assert_eq!(h.termination, Termination::Stalled);
        assert_eq!(h.cycles, 4);
        assert_eq!(h.texts.len(), 3);
        assert_eq!(session.loader_checks, 2 * h.cycles);
    }

    #[tokio::test]
    async fn missing_item_list_fails_with_selector_timeout() {
        let cfg = test_harvest_config();
        let mut session = session_with(
            FakePage::new(CountScript::Constant(0)).failing(FakeFailure::SelectorTimeout),
        );

        let err = ScrollHarvester::new(cfg)
            .harvest(&mut session, URL)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::SelectorTimeout { .. }));
        assert_eq!(session.scroll_calls, 0);
    }

    #[tokio::test]
    async fn mid_loop_failure_keeps_last_snapshot() {
        let cfg = test_harvest_config();
        let script = CountScript::Growing { start: 3 };
        let mut session =
            session_with(FakePage::new(script).failing(FakeFailure::ScrollAfter(2)));

        let h = ScrollHarvester::new(cfg)
            .harvest(&mut session, URL)
            .await
            .unwrap();

        assert_eq!(h.termination, Termination::Interrupted);
        assert_eq!(h.texts.len(), 5);
        assert_eq!(h.texts[0], "Company 0");
    }

    #[test]
    fn scroll_state_transitions() {
        let mut s = ScrollState::new(3);
        assert_eq!(s.observe(3, 2), HarvestState::Stalled);
        assert_eq!(s.observe(4, 2), HarvestState::Scrolling);
        assert_eq!(s.consecutive_stall_count, 0);
        assert_eq!(s.observe(4, 2), HarvestState::Stalled);
        assert_eq!(s.observe(4, 2), HarvestState::Done);
    }
}
