use crate::moves::{Color, Move, Vertex};
use crate::state::{PlayError, Position};

fn v(x: u8, y: u8) -> Vertex {
    Vertex::new(x, y)
}

#[test]
fn initial_position() {
    let pos = Position::new(9, 7.5);
    assert_eq!(pos.to_move(), Color::Black);
    assert_eq!(pos.passes(), 0);
    assert_eq!(pos.last_move(), Move::None);
    assert_eq!(pos.move_num(), 0);
    assert!(!pos.is_terminal());
    assert_eq!(pos.legal_moves().len(), 82);
}

#[test]
fn two_passes_end_the_game() {
    let mut pos = Position::new(9, 7.5);
    pos.play(Move::Pass).unwrap();
    assert_eq!(pos.passes(), 1);
    assert_eq!(pos.to_move(), Color::White);
    assert!(!pos.is_terminal());
    pos.play(Move::Pass).unwrap();
    assert_eq!(pos.passes(), 2);
    assert!(pos.is_terminal());
}

#[test]
fn stone_play_resets_pass_count() {
    let mut pos = Position::new(9, 7.5);
    pos.play(Move::Pass).unwrap();
    pos.play(Move::Vertex(v(4, 4))).unwrap();
    assert_eq!(pos.passes(), 0);
    assert_eq!(pos.last_move(), Move::Vertex(v(4, 4)));
}

#[test]
fn occupied_vertex_is_illegal() {
    let mut pos = Position::new(9, 7.5);
    pos.play(Move::Vertex(v(4, 4))).unwrap();
    let err = pos.play(Move::Vertex(v(4, 4))).unwrap_err();
    assert!(matches!(err, PlayError::Illegal { .. }));
}

#[test]
fn none_is_never_legal() {
    let mut pos = Position::new(9, 7.5);
    assert!(!pos.is_legal(Color::Black, Move::None));
    assert!(pos.play(Move::None).is_err());
}

#[test]
fn simple_ko_is_rejected_for_one_turn() {
    let mut pos = Position::new(9, 7.5);
    // Standard ko shape:
    //   . B W .
    //   B . . W     <- the ko fight happens at (1,0)/(2,0)
    //   (y = 0 row below)
    pos.put_stone(Color::Black, v(1, 1));
    pos.put_stone(Color::Black, v(0, 0));
    pos.put_stone(Color::White, v(2, 1));
    pos.put_stone(Color::White, v(3, 0));
    pos.put_stone(Color::White, v(1, 0));

    // Black captures the white stone at (1,0) by playing (2,0).
    pos.play(Move::Vertex(v(2, 0))).unwrap();
    assert!(pos.board().is_empty(v(1, 0)));

    // White may not immediately recapture at (1,0).
    assert!(!pos.is_legal(Color::White, Move::Vertex(v(1, 0))));

    // After a move elsewhere the ko point opens up again.
    pos.play(Move::Vertex(v(7, 7))).unwrap();
    assert!(pos.is_legal(Color::Black, Move::Vertex(v(5, 5))));
}

#[test]
fn resign_is_legal_and_terminal() {
    let mut pos = Position::new(9, 7.5);
    pos.play(Move::Resign).unwrap();
    assert!(pos.is_terminal());
}

#[test]
fn clone_is_independent() {
    let mut pos = Position::new(9, 7.5);
    let snapshot = pos.clone();
    pos.play(Move::Vertex(v(0, 0))).unwrap();
    assert_eq!(snapshot.move_num(), 0);
    assert!(snapshot.board().is_empty(v(0, 0)));
}

#[test]
fn final_score_includes_komi() {
    let mut pos = Position::new(5, 0.5);
    pos.put_stone(Color::Black, v(2, 2));
    // Lone black stone: whole board becomes black area.
    assert_eq!(pos.final_score(), 25.0 - 0.5);
}
