//! Differential dataflow rendition of the top-articles view.
//!
//! Counts are maintained by `count`, and each `(window, industry)` group is re-ranked by
//! `reduce` whenever one of its counts changes; differential emits the retraction of the
//! previous ranking together with the new one.

use std::cmp::Reverse;

use differential_dataflow::lattice::Lattice;
use differential_dataflow::operators::{Count, Reduce};
use differential_dataflow::Collection;
use timely::dataflow::Scope;

use ta_core::{ArticleKey, WindowedKey};

/// One record per page view (already windowed) in, `(window, industry) -> top pages` out.
pub fn top_articles<G>(
    views: &Collection<G, WindowedKey<ArticleKey>>,
    top_n: usize,
) -> Collection<G, (WindowedKey<String>, Vec<String>)>
where
    G: Scope,
    G::Timestamp: Lattice + Ord,
{
    views
        .count()
        .map(|(article, count)| {
            let key = WindowedKey::new(article.window, article.key.industry);
            (key, (Reverse(count), article.key.page))
        })
        .reduce(move |_industry, inputs, output| {
            // values arrive sorted: count descending, then page ascending
            let pages: Vec<String> = inputs
                .iter()
                .filter(|(_, diff)| *diff > 0)
                .take(top_n)
                .map(|((_, page), _)| page.clone())
                .collect();
            output.push((pages, 1));
        })
}
