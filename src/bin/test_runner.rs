// LaserPost test runner: runs the post-processors against the test collection
// Usage: laserpost-test [tests.yaml] [-t test]... [-p post]... [-s create]

fn main() {
    laserpost_harness::cli::run();
}
