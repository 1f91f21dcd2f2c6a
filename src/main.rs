#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    chirpy_api::rocket()
}
