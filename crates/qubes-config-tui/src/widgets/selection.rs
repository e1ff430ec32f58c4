//! Row selection helpers over [`TableState`].

use ratatui::widgets::TableState;

pub fn selected(state: &TableState) -> usize {
    state.selected().unwrap_or(0)
}

/// Keep the selection inside `len` rows; nothing is selected in an empty table.
pub fn clamp(state: &mut TableState, len: usize) {
    if len == 0 {
        state.select(None);
    } else {
        state.select(Some(selected(state).min(len - 1)));
    }
}

pub fn move_by(state: &mut TableState, len: usize, delta: isize) {
    if len == 0 {
        return;
    }
    let next = selected(state).saturating_add_signed(delta).min(len - 1);
    state.select(Some(next));
}

pub fn last(state: &mut TableState, len: usize) {
    state.select(len.checked_sub(1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_stay_in_bounds() {
        let mut state = TableState::default();
        move_by(&mut state, 3, -1);
        assert_eq!(state.selected(), Some(0));
        move_by(&mut state, 3, 10);
        assert_eq!(state.selected(), Some(2));
    }

    #[test]
    fn clamp_after_rows_disappear() {
        let mut state = TableState::default().with_selected(Some(4));
        clamp(&mut state, 2);
        assert_eq!(state.selected(), Some(1));
        clamp(&mut state, 0);
        assert_eq!(state.selected(), None);
    }
}
