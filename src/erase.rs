//! Region eraser.
//!
//! Rectangles are queued while the page is still untouched and committed in
//! one pass: every glyph whose box overlaps a queued region is cut out of its
//! text operator, filled rectangles lying wholly inside a region are
//! dropped, and an opaque white fill is painted over each region.
//! Cut glyphs are replaced by `TJ` displacements so the remaining text on the
//! same line keeps its position.

use crate::content::{interpret_page, FilledRect, Glyph};
use crate::geometry::{number, PageFrame, Rect};
use anyhow::{Context, Result};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

/// What a commit did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EraseStats {
    pub glyphs_removed: usize,
    pub fills_removed: usize,
    pub regions: usize,
}

/// Regions waiting to be erased from one page.
#[derive(Debug, Clone, Default)]
pub struct RedactionQueue {
    rects: Vec<Rect>,
}

impl RedactionQueue {
    pub fn new() -> Self {
        RedactionQueue::default()
    }

    /// Queue a region. Empty rectangles are ignored.
    pub fn push(&mut self, rect: Rect) {
        if !rect.is_empty() {
            self.rects.push(rect);
        }
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// Erase every queued region from the page and clear the queue.
    ///
    /// The rewritten content is wrapped in `q … Q`, so anything appended
    /// afterwards starts from the default graphics state.
    pub fn commit(&mut self, doc: &mut Document, page_id: ObjectId) -> Result<EraseStats> {
        if self.rects.is_empty() {
            return Ok(EraseStats::default());
        }
        let rects = std::mem::take(&mut self.rects);
        let content = interpret_page(doc, page_id)?;

        let removed: HashSet<usize> = content
            .glyphs
            .iter()
            .enumerate()
            .filter(|(_, g)| rects.iter().any(|r| glyph_hit(r, g)))
            .map(|(i, _)| i)
            .collect();
        let (dropped_ops, fills_removed) = covered_fills(&content.fills, &rects);

        let mut operations = vec![Operation::new("q", vec![])];
        operations.extend(rewrite_operations(
            &content.operations,
            &content.glyphs,
            &removed,
            &dropped_ops,
        ));
        operations.push(Operation::new("Q", vec![]));
        let encoded = Content { operations }
            .encode()
            .context("Failed to encode rewritten page content")?;
        replace_page_content(doc, page_id, encoded)?;

        append_page_stream(doc, page_id, white_fill(&content.frame, &rects).into_bytes())?;

        log::debug!(
            "erased {} glyph(s) and {} fill(s) in {} region(s) on page {:?}",
            removed.len(),
            fills_removed,
            rects.len(),
            page_id
        );
        Ok(EraseStats {
            glyphs_removed: removed.len(),
            fills_removed,
            regions: rects.len(),
        })
    }
}

/// Positive-area overlap, or for zero-width marks, the mark's origin inside.
fn glyph_hit(rect: &Rect, glyph: &Glyph) -> bool {
    if glyph.bbox.width() > 0.0 && glyph.bbox.height() > 0.0 {
        return rect.intersects(&glyph.bbox);
    }
    let x = glyph.bbox.x0;
    let y = glyph.bbox.center_y();
    x >= rect.x0 && x <= rect.x1 && y >= rect.y0 && y <= rect.y1
}

/// Operations of rectangle-only fills that lie wholly inside a region.
///
/// A paint operation goes only when every rectangle it paints is covered;
/// its `re` operations go with it. Returns the operation indices and the
/// number of rectangles removed.
fn covered_fills(fills: &[FilledRect], rects: &[Rect]) -> (HashSet<usize>, usize) {
    let mut by_paint: BTreeMap<usize, Vec<&FilledRect>> = BTreeMap::new();
    for fill in fills {
        by_paint.entry(fill.paint_index).or_default().push(fill);
    }
    let mut ops = HashSet::new();
    let mut count = 0;
    for (paint_index, group) in by_paint {
        let covered = group
            .iter()
            .all(|f| f.rect_path && rects.iter().any(|r| r.contains(&f.rect)));
        if covered {
            ops.insert(paint_index);
            ops.extend(group.iter().map(|f| f.re_index));
            count += group.len();
        }
    }
    (ops, count)
}

fn white_fill(frame: &PageFrame, rects: &[Rect]) -> String {
    let mut out = String::from("q\n1 1 1 rg\n");
    for rect in rects {
        let (x, y, w, h) = frame.user_re(rect);
        let _ = writeln!(out, "{:.3} {:.3} {:.3} {:.3} re f", x, y, w, h);
    }
    out.push_str("Q\n");
    out
}

// ─── Operator rewriting ──────────────────────────────────────────────────────

/// Append a `TJ` number, folding it into a preceding number.
fn push_displacement(items: &mut Vec<Object>, value: f32) {
    if let Some(last) = items.last_mut() {
        if let Some(prev) = number(last) {
            *last = Object::Real(prev + value);
            return;
        }
    }
    items.push(Object::Real(value));
}

/// Copy the operations, cutting removed glyphs out of their show operators
/// and leaving out the `dropped` operations.
fn rewrite_operations(
    operations: &[Operation],
    glyphs: &[Glyph],
    removed: &HashSet<usize>,
    dropped: &HashSet<usize>,
) -> Vec<Operation> {
    // op index -> glyph indices shown by it, in order
    let mut by_op: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &gi in removed {
        by_op.entry(glyphs[gi].op_index).or_default();
    }
    for (gi, g) in glyphs.iter().enumerate() {
        if let Some(list) = by_op.get_mut(&g.op_index) {
            list.push(gi);
        }
    }

    let mut out = Vec::with_capacity(operations.len() + by_op.len() * 3);
    for (op_index, op) in operations.iter().enumerate() {
        if dropped.contains(&op_index) {
            continue;
        }
        let shown = match by_op.get(&op_index) {
            Some(list) => list,
            None => {
                out.push(op.clone());
                continue;
            }
        };
        let elements: Vec<Object> = match op.operator.as_str() {
            "TJ" => match op.operands.first() {
                Some(Object::Array(items)) => items.clone(),
                _ => Vec::new(),
            },
            "Tj" | "'" => op.operands.first().cloned().into_iter().collect(),
            "\"" => op.operands.get(2).cloned().into_iter().collect(),
            _ => {
                out.push(op.clone());
                continue;
            }
        };

        let mut items: Vec<Object> = Vec::new();
        for (elem_index, element) in elements.iter().enumerate() {
            match element {
                Object::String(bytes, format) => {
                    let mut run: Vec<u8> = Vec::new();
                    for &gi in shown.iter().filter(|&&gi| glyphs[gi].elem_index == elem_index) {
                        let g = &glyphs[gi];
                        let end = (g.byte_start + g.byte_len).min(bytes.len());
                        if removed.contains(&gi) {
                            if !run.is_empty() {
                                items.push(Object::String(std::mem::take(&mut run), format.clone()));
                            }
                            push_displacement(&mut items, g.tj_displacement);
                        } else if g.byte_start < end {
                            run.extend_from_slice(&bytes[g.byte_start..end]);
                        }
                    }
                    if !run.is_empty() {
                        items.push(Object::String(run, format.clone()));
                    }
                }
                other => match number(other) {
                    Some(n) => push_displacement(&mut items, n),
                    None => items.push(other.clone()),
                },
            }
        }

        match op.operator.as_str() {
            "'" => out.push(Operation::new("T*", vec![])),
            "\"" => {
                let spacing = |i: usize| op.operands.get(i).cloned().unwrap_or(Object::Integer(0));
                out.push(Operation::new("Tw", vec![spacing(0)]));
                out.push(Operation::new("Tc", vec![spacing(1)]));
                out.push(Operation::new("T*", vec![]));
            }
            _ => {}
        }
        out.push(Operation::new("TJ", vec![Object::Array(items)]));
    }
    out
}

// ─── Page content helpers ────────────────────────────────────────────────────

/// Replace a page's `/Contents` with one new stream.
///
/// A fresh object is always created, so content streams shared with other
/// pages are left alone.
pub(crate) fn replace_page_content(doc: &mut Document, page_id: ObjectId, content: Vec<u8>) -> Result<()> {
    let stream_id = doc.add_object(Object::Stream(Stream::new(lopdf::Dictionary::new(), content)));
    let page = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .context("Page object is not a dictionary")?;
    page.set("Contents", Object::Reference(stream_id));
    Ok(())
}

/// Append a content stream after the page's existing content.
pub(crate) fn append_page_stream(doc: &mut Document, page_id: ObjectId, content: Vec<u8>) -> Result<()> {
    let stream_id = doc.add_object(Object::Stream(Stream::new(lopdf::Dictionary::new(), content)));
    let page = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .context("Page object is not a dictionary")?;

    match page.get(b"Contents").ok().cloned() {
        Some(Object::Reference(existing)) => {
            page.set(
                "Contents",
                Object::Array(vec![Object::Reference(existing), Object::Reference(stream_id)]),
            );
        }
        Some(Object::Array(mut arr)) => {
            arr.push(Object::Reference(stream_id));
            page.set("Contents", Object::Array(arr));
        }
        _ => page.set("Contents", Object::Reference(stream_id)),
    }
    Ok(())
}

/// Wrap the page's current content in `q … Q` without re-encoding it.
pub(crate) fn isolate_page_content(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    let open_id = doc.add_object(Object::Stream(Stream::new(lopdf::Dictionary::new(), b"q\n".to_vec())));
    let close_id = doc.add_object(Object::Stream(Stream::new(lopdf::Dictionary::new(), b"\nQ\n".to_vec())));
    let page = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .context("Page object is not a dictionary")?;

    let mut contents = vec![Object::Reference(open_id)];
    match page.get(b"Contents").ok().cloned() {
        Some(Object::Array(arr)) => contents.extend(arr),
        Some(other) => contents.push(other),
        None => {}
    }
    contents.push(Object::Reference(close_id));
    page.set("Contents", Object::Array(contents));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::interpret_page;
    use crate::locate::{find_text, PageText};
    use crate::test_support::{show_text, single_page_doc};

    /// Shrink horizontally so neighbouring glyphs that merely touch are not hit.
    fn inset(rect: &Rect) -> Rect {
        Rect::new(rect.x0 + 0.5, rect.y0, rect.x1 - 0.5, rect.y1)
    }

    #[test]
    fn test_commit_removes_only_matched_glyphs() {
        let (mut doc, page_id) = single_page_doc(show_text(72.0, 700.0, 12.0, "Hello World"));
        let before = interpret_page(&doc, page_id).unwrap();
        let hit = find_text(&before, "World").remove(0);
        let world_x = before.glyphs[hit.glyphs[0]].pen_start;

        let mut queue = RedactionQueue::new();
        queue.push(inset(&hit.rect));
        let stats = queue.commit(&mut doc, page_id).unwrap();
        assert_eq!(stats.glyphs_removed, 5);
        assert_eq!(stats.regions, 1);
        assert!(queue.is_empty());

        let after = interpret_page(&doc, page_id).unwrap();
        // the space before "World" lies outside the region and survives
        assert_eq!(PageText::new(&after).lines(), vec!["Hello ".to_string()]);
        assert_eq!(after.fills.len(), 1);
        assert_eq!(after.fills[0].color, [1.0, 1.0, 1.0]);
        let hello_x = after.glyphs[0].pen_start;
        assert!((hello_x - before.glyphs[0].pen_start).abs() < 0.01);
        assert!(world_x > hello_x);
    }

    #[test]
    fn test_removal_keeps_following_glyph_positions() {
        let (mut doc, page_id) = single_page_doc(show_text(72.0, 700.0, 12.0, "abcdef"));
        let before = interpret_page(&doc, page_id).unwrap();
        let f_x = before.glyphs[5].pen_start;
        let hit = find_text(&before, "cd").remove(0);

        let mut queue = RedactionQueue::new();
        queue.push(inset(&hit.rect));
        queue.commit(&mut doc, page_id).unwrap();

        let after = interpret_page(&doc, page_id).unwrap();
        let texts: String = after.glyphs.iter().map(|g| g.text.as_str()).collect();
        assert_eq!(texts, "abef");
        let f_after = after.glyphs.iter().find(|g| g.text == "f").unwrap();
        assert!((f_after.pen_start - f_x).abs() < 0.01);
    }

    #[test]
    fn test_fills_inside_region_are_dropped() {
        let ops = vec![
            Operation::new("rg", vec![0.into(), 0.into(), 1.into()]),
            // wholly inside the region
            Operation::new("re", vec![100.into(), 600.into(), 20.into(), 10.into()]),
            Operation::new("f", vec![]),
            // crosses the region boundary
            Operation::new("re", vec![50.into(), 500.into(), 300.into(), 200.into()]),
            Operation::new("f", vec![]),
            // inside, but part of a path with other segments
            Operation::new("m", vec![100.into(), 595.into()]),
            Operation::new("l", vec![110.into(), 595.into()]),
            Operation::new("re", vec![100.into(), 590.into(), 5.into(), 3.into()]),
            Operation::new("f", vec![]),
        ];
        let (mut doc, page_id) = single_page_doc(ops);
        assert_eq!(interpret_page(&doc, page_id).unwrap().fills.len(), 3);

        let mut queue = RedactionQueue::new();
        queue.push(Rect::new(90.0, 170.0, 130.0, 210.0));
        let stats = queue.commit(&mut doc, page_id).unwrap();
        assert_eq!(stats.fills_removed, 1);
        assert_eq!(stats.glyphs_removed, 0);

        let after = interpret_page(&doc, page_id).unwrap();
        let blue: Vec<_> = after.fills.iter().filter(|f| f.color == [0.0, 0.0, 1.0]).collect();
        assert_eq!(blue.len(), 2);
        assert!(blue.iter().all(|f| f.rect != Rect::new(100.0, 182.0, 120.0, 192.0)));
        assert_eq!(after.fills.iter().filter(|f| f.color == [1.0, 1.0, 1.0]).count(), 1);
    }

    #[test]
    fn test_quote_operator_is_rewritten() {
        let ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("TL", vec![14.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("'", vec![Object::string_literal("gone")]),
            Operation::new("ET", vec![]),
        ];
        let (mut doc, page_id) = single_page_doc(ops);
        let before = interpret_page(&doc, page_id).unwrap();
        let baseline = before.glyphs[0].baseline;
        let hit = find_text(&before, "gone").remove(0);

        let mut queue = RedactionQueue::new();
        queue.push(hit.rect);
        queue.commit(&mut doc, page_id).unwrap();

        let after = interpret_page(&doc, page_id).unwrap();
        assert!(after.glyphs.is_empty());
        assert!(after.operations.iter().any(|op| op.operator == "T*"));
        assert!(!after.operations.iter().any(|op| op.operator == "'"));
        // the quote operator moved down one leading before showing
        assert!((baseline - (792.0 - 686.0)).abs() < 0.01);
    }

    #[test]
    fn test_empty_queue_is_noop() {
        let (mut doc, page_id) = single_page_doc(show_text(72.0, 700.0, 12.0, "Keep"));
        let contents_before = doc.get_dictionary(page_id).unwrap().get(b"Contents").unwrap().clone();
        let stats = RedactionQueue::new().commit(&mut doc, page_id).unwrap();
        assert_eq!(stats, EraseStats::default());
        let contents_after = doc.get_dictionary(page_id).unwrap().get(b"Contents").unwrap().clone();
        assert_eq!(contents_before, contents_after);
    }

    #[test]
    fn test_isolate_wraps_content() {
        let (mut doc, page_id) = single_page_doc(show_text(72.0, 700.0, 12.0, "Keep"));
        isolate_page_content(&mut doc, page_id).unwrap();
        let ops = interpret_page(&doc, page_id).unwrap().operations;
        assert_eq!(ops.first().map(|o| o.operator.as_str()), Some("q"));
        assert_eq!(ops.last().map(|o| o.operator.as_str()), Some("Q"));
    }

    #[test]
    fn test_displacements_merge() {
        let mut items = vec![Object::String(b"a".to_vec(), lopdf::StringFormat::Literal)];
        push_displacement(&mut items, -100.0);
        push_displacement(&mut items, -50.0);
        assert_eq!(items.len(), 2);
        assert_eq!(number(&items[1]), Some(-150.0));
    }
}
