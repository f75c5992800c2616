use criterion::{black_box, criterion_group, criterion_main, Criterion};
use chess_live::core::check::king_report;
use chess_live::core::movegen::destinations;
use chess_live::core::{
    Action, Actor, Audience, Board, Delta, Match, NullSink, Piece, StandardCatalog,
};
use chess_live::types::{Color, MatchConfig, PieceKind, Tile};

fn tile(name: &str) -> Tile {
    Tile::from_name(name).unwrap()
}

fn bench_opening_moves(c: &mut Criterion) {
    let board = Board::standard(&StandardCatalog);
    let ids = board.ids_of(Color::White);

    c.bench_function("destinations_all_white_opening", |b| {
        b.iter(|| {
            for id in &ids {
                black_box(destinations(&board, *id, None));
            }
        })
    });
}

fn bench_king_report(c: &mut Criterion) {
    let board = Board::standard(&StandardCatalog);

    c.bench_function("king_report_opening", |b| {
        b.iter(|| black_box(king_report(&board, black_box(Color::White))))
    });
}

fn bench_legal_moves(c: &mut Criterion) {
    let mut game = Match::new(MatchConfig::default());

    c.bench_function("legal_moves_knight", |b| {
        b.iter(|| black_box(game.legal_moves(black_box(tile("1g")))))
    });
}

fn bench_mate_detection(c: &mut Criterion) {
    let catalog = StandardCatalog;
    let mut board = Board::new();
    for (name, color, kind, at) in [
        ("white_king", Color::White, PieceKind::King, "1h"),
        ("black_king", Color::Black, PieceKind::King, "3f"),
        ("black_queen", Color::Black, PieceKind::Queen, "4g"),
    ] {
        board
            .place(Piece::new(name, color, kind, tile(at), &catalog))
            .unwrap();
    }
    let start = Match::from_position(board, Color::Black, MatchConfig::default());

    c.bench_function("mating_move_and_detection", |b| {
        b.iter(|| {
            let mut game = start.clone();
            let mut sink = NullSink;
            game.apply(Actor::Local, Action::Select(tile("4g")), &mut sink);
            black_box(game.apply(Actor::Local, Action::MoveTo(tile("2g")), &mut sink))
        })
    });
}

fn bench_opening_sequence(c: &mut Criterion) {
    c.bench_function("play_six_plies", |b| {
        b.iter(|| {
            let mut game = Match::new(MatchConfig::default());
            let mut sink: Vec<(Audience, Delta)> = Vec::new();
            for (from, to) in [
                ("2e", "4e"),
                ("7e", "5e"),
                ("1g", "3f"),
                ("8b", "6c"),
                ("1f", "4c"),
                ("8g", "6f"),
            ] {
                game.apply(Actor::Local, Action::Select(tile(from)), &mut sink);
                game.apply(Actor::Local, Action::MoveTo(tile(to)), &mut sink);
            }
            black_box(sink.len())
        })
    });
}

criterion_group!(
    benches,
    bench_opening_moves,
    bench_king_report,
    bench_legal_moves,
    bench_mate_detection,
    bench_opening_sequence
);
criterion_main!(benches);
