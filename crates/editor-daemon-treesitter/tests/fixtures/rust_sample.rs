// Sample input for the Tree-sitter adapter tests.

struct Point {
    x: i32,
    y: i32,
}

fn distance(a: &Point, b: &Point) -> i32 {
    let dx = (a.x - b.x).abs();
    let dy = (a.y - b.y).abs();
    dx + dy
}

fn main() {
    let origin = Point { x: 0, y: 0 };
    let target = Point { x: 3, y: 4 };
    let total = distance(&origin, &target);
    println!("{total}");
}
