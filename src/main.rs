fn main() {
    pooled_grid_sim::start();
}
