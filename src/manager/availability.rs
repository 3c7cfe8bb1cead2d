use crate::model::*;

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
    for span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(*span),
        }
    }
    merged
}

/// `base - to_remove`. Both inputs sorted by start; `to_remove` may overlap.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let to_remove = merge_overlapping(to_remove);
    let mut result = Vec::new();
    let mut j = 0;
    for b in base {
        let mut cursor = b.start;
        while j < to_remove.len() && to_remove[j].end <= cursor {
            j += 1;
        }
        let mut k = j;
        while k < to_remove.len() && to_remove[k].start < b.end {
            let r = to_remove[k];
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            k += 1;
        }
        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }
    result
}
