//! Resumable sweep position over keyword vocabulary × sub-source list.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    DiscussionForum,
    News,
}

/// Where the next batch picks up. Lives for the process only; a restart
/// begins a fresh sweep and relies on url dedup to skip known items.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ScrapeCursor {
    pub phase: Phase,
    pub keyword_index: usize,
    pub source_index: usize,
    pub news_keyword_index: usize,
}

impl ScrapeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current `(keyword, sub_source)` slot of the forum phase. Flips to the
    /// news phase and returns `None` once the forum phase has nothing left.
    pub fn forum_slot(&mut self, keywords: usize, sub_sources: usize) -> Option<(usize, usize)> {
        if self.phase != Phase::DiscussionForum {
            return None;
        }
        if self.keyword_index >= keywords || sub_sources == 0 {
            self.phase = Phase::News;
            return None;
        }
        Some((self.keyword_index, self.source_index))
    }

    /// Inner loop over sub-sources, outer loop over keywords.
    pub fn advance_forum(&mut self, keywords: usize, sub_sources: usize) {
        self.source_index += 1;
        if self.source_index >= sub_sources {
            self.source_index = 0;
            self.keyword_index += 1;
        }
        if self.keyword_index >= keywords {
            self.phase = Phase::News;
        }
    }

    pub fn news_slot(&self, keywords: usize) -> Option<usize> {
        (self.phase == Phase::News && self.news_keyword_index < keywords)
            .then_some(self.news_keyword_index)
    }

    /// Returns true when this advance completed the full cycle and reset the cursor.
    pub fn advance_news(&mut self, keywords: usize) -> bool {
        self.news_keyword_index += 1;
        if self.news_keyword_index >= keywords {
            self.reset();
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
