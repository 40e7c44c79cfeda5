//! Fuses text chunks and figure analyses into one indexable stream.
//!
//! Abbreviation definitions are inlined into the chunks that mention them so
//! that retrieval over the expanded form still lands on the chunk. Figure
//! analyses become text renderings of their structured fields. The output
//! ordering is fixed: all text units first, in chunk order, then all figure
//! units, in analysis order.

use crate::index::IndexableUnit;
use crate::ingest::figures::FigureAnalysis;
use docq_context::TextChunk;
use std::collections::BTreeMap;

/// Inline resolved definitions into every chunk that mentions the
/// abbreviation, rewriting each occurrence as `ABBR (definition)`.
///
/// A chunk that already contains the definition text is left alone, which
/// also makes the operation idempotent. Matching is literal substring
/// matching, so an abbreviation that happens to appear inside a longer word
/// is rewritten too; with the 2-to-10 uppercase extraction rule this has not
/// been a problem in practice.
pub fn inline_definitions(
    chunks: &mut [TextChunk],
    definitions: &BTreeMap<String, String>,
) -> usize {
    let mut rewritten = 0;
    for chunk in chunks.iter_mut() {
        for (abbreviation, definition) in definitions {
            if chunk.chunk_text.contains(abbreviation.as_str())
                && !chunk.chunk_text.contains(definition.as_str())
            {
                let expanded = format!("{abbreviation} ({definition})");
                chunk.chunk_text = chunk.chunk_text.replace(abbreviation.as_str(), &expanded);
                rewritten += 1;
            }
        }
    }
    rewritten
}

/// Render one figure analysis as indexable text.
///
/// Only the analysis fields are rendered; page and image provenance live in
/// the unit metadata. An analysis with no populated fields still yields the
/// `(figure)` marker so the unit is never blank.
pub fn figure_to_unit(analysis: &FigureAnalysis) -> IndexableUnit {
    let fields = &analysis.analysis;
    let mut lines = Vec::new();

    if let Some(title) = &fields.title {
        lines.push(format!("Title: {title}"));
    }
    if let Some(chart_type) = &fields.chart_type {
        lines.push(format!("Chart type: {chart_type}"));
    }
    if let Some(label) = &fields.axes.x.label {
        match &fields.axes.x.unit {
            Some(unit) => lines.push(format!("X axis: {label} ({unit})")),
            None => lines.push(format!("X axis: {label}")),
        }
    }
    if let Some(label) = &fields.axes.y.label {
        match &fields.axes.y.unit {
            Some(unit) => lines.push(format!("Y axis: {label} ({unit})")),
            None => lines.push(format!("Y axis: {label}")),
        }
    }
    for series in &fields.series {
        match (&series.label, &series.trend) {
            (Some(label), Some(trend)) => lines.push(format!("Series {label}: {trend}")),
            (Some(label), None) => lines.push(format!("Series {label}")),
            (None, Some(trend)) => lines.push(format!("Series trend: {trend}")),
            (None, None) => {}
        }
    }
    if !fields.key_values.is_empty() {
        lines.push(format!("Key values: {}", fields.key_values.join(", ")));
    }
    if let Some(summary) = &fields.summary {
        lines.push(format!("Summary: {summary}"));
    }

    let content = if lines.is_empty() {
        "(figure)".to_string()
    } else {
        lines.join("\n")
    };

    IndexableUnit::figure(
        content,
        analysis.source_page,
        &analysis.image_path.to_string_lossy(),
        analysis.figure_index_in_image,
    )
}

/// Combine definition-inlined chunks and figure analyses into the final
/// unit stream. Chunks whose text is blank after trimming are dropped.
pub fn fuse(chunks: &[TextChunk], analyses: &[FigureAnalysis]) -> Vec<IndexableUnit> {
    let mut units: Vec<IndexableUnit> = chunks
        .iter()
        .filter(|chunk| !chunk.chunk_text.trim().is_empty())
        .map(|chunk| {
            IndexableUnit::text_chunk(
                chunk.chunk_text.clone(),
                &chunk.source,
                chunk.page,
                chunk.sequence,
            )
        })
        .collect();

    units.extend(analyses.iter().map(figure_to_unit));
    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::figures::{Axes, AxisLabel, FigureFields, SeriesEntry};
    use std::path::PathBuf;

    fn chunk(text: &str, sequence: usize) -> TextChunk {
        TextChunk {
            source: "doc.pdf".to_string(),
            page: 1,
            sequence,
            chunk_text: text.to_string(),
        }
    }

    #[test]
    fn every_occurrence_in_a_chunk_is_expanded() {
        let mut chunks = vec![chunk("The ECB raised rates. The ECB also warned.", 0)];
        let definitions = BTreeMap::from([(
            "ECB".to_string(),
            "European Central Bank".to_string(),
        )]);

        let rewritten = inline_definitions(&mut chunks, &definitions);

        assert_eq!(rewritten, 1);
        assert_eq!(
            chunks[0].chunk_text,
            "The ECB (European Central Bank) raised rates. \
             The ECB (European Central Bank) also warned."
        );
    }

    #[test]
    fn inlining_is_idempotent() {
        let mut chunks = vec![chunk("The ECB raised rates.", 0)];
        let definitions = BTreeMap::from([(
            "ECB".to_string(),
            "European Central Bank".to_string(),
        )]);

        inline_definitions(&mut chunks, &definitions);
        let first_pass = chunks[0].chunk_text.clone();
        let rewritten = inline_definitions(&mut chunks, &definitions);

        assert_eq!(rewritten, 0);
        assert_eq!(chunks[0].chunk_text, first_pass);
    }

    #[test]
    fn chunks_without_the_abbreviation_are_untouched() {
        let mut chunks = vec![chunk("Nothing relevant here.", 0)];
        let definitions = BTreeMap::from([(
            "ECB".to_string(),
            "European Central Bank".to_string(),
        )]);

        assert_eq!(inline_definitions(&mut chunks, &definitions), 0);
        assert_eq!(chunks[0].chunk_text, "Nothing relevant here.");
    }

    fn full_analysis() -> FigureAnalysis {
        FigureAnalysis {
            source_page: Some(4),
            image_path: PathBuf::from("figures/page_4.png"),
            figure_index_in_image: 0,
            analysis: FigureFields {
                title: Some("Quarterly revenue".to_string()),
                chart_type: Some("bar".to_string()),
                axes: Axes {
                    x: AxisLabel {
                        label: Some("Quarter".to_string()),
                        unit: None,
                    },
                    y: AxisLabel {
                        label: Some("Revenue".to_string()),
                        unit: Some("M EUR".to_string()),
                    },
                },
                series: vec![SeriesEntry {
                    label: Some("2024".to_string()),
                    trend: Some("rising".to_string()),
                }],
                key_values: vec!["Q4 peak 12M".to_string()],
                summary: Some("Revenue grows through the year.".to_string()),
            },
        }
    }

    #[test]
    fn figure_rendering_lists_present_fields() {
        let unit = figure_to_unit(&full_analysis());

        assert!(unit.is_figure());
        assert_eq!(
            unit.content,
            "Title: Quarterly revenue\n\
             Chart type: bar\n\
             X axis: Quarter\n\
             Y axis: Revenue (M EUR)\n\
             Series 2024: rising\n\
             Key values: Q4 peak 12M\n\
             Summary: Revenue grows through the year."
        );
        assert_eq!(unit.metadata.get("page").map(String::as_str), Some("4"));
    }

    #[test]
    fn empty_analysis_still_produces_a_marker_unit() {
        let analysis = FigureAnalysis {
            source_page: None,
            image_path: PathBuf::from("figures/page_9.png"),
            figure_index_in_image: 2,
            analysis: FigureFields::default(),
        };

        let unit = figure_to_unit(&analysis);
        assert_eq!(unit.content, "(figure)");
        assert_eq!(
            unit.metadata.get("figure_index").map(String::as_str),
            Some("2")
        );
    }

    #[test]
    fn known_page_does_not_rescue_an_empty_analysis() {
        // Page provenance belongs in metadata, never in the rendered text.
        let analysis = FigureAnalysis {
            source_page: Some(4),
            image_path: PathBuf::from("figures/page_4.png"),
            figure_index_in_image: 0,
            analysis: FigureFields::default(),
        };

        let unit = figure_to_unit(&analysis);
        assert_eq!(unit.content, "(figure)");
        assert_eq!(unit.metadata.get("page").map(String::as_str), Some("4"));
    }

    #[test]
    fn fuse_orders_text_before_figures_and_drops_blank_chunks() {
        let chunks = vec![chunk("First chunk.", 0), chunk("   ", 1), chunk("Second.", 2)];
        let analyses = vec![full_analysis()];

        let units = fuse(&chunks, &analyses);

        assert_eq!(units.len(), 3);
        assert!(!units[0].is_figure());
        assert_eq!(units[0].content, "First chunk.");
        assert_eq!(units[1].content, "Second.");
        assert!(units[2].is_figure());
    }
}
